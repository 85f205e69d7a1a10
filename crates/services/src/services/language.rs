use std::{collections::HashMap, path::Path};

use ignore::WalkBuilder;

// Fixed extension table; anything not listed is ignored for detection.
const LANGUAGE_BY_EXTENSION: &[(&str, &str)] = &[
    ("cs", "C#"),
    ("csx", "C#"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("py", "Python"),
    ("pyi", "Python"),
    ("java", "Java"),
    ("go", "Go"),
    ("rs", "Rust"),
    ("c", "C"),
    ("h", "C"),
    ("cpp", "C++"),
    ("cc", "C++"),
    ("cxx", "C++"),
    ("hpp", "C++"),
    ("hh", "C++"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("swift", "Swift"),
    ("kt", "Kotlin"),
    ("kts", "Kotlin"),
    ("scala", "Scala"),
    ("m", "Objective-C"),
    ("mm", "Objective-C++"),
    ("fs", "F#"),
    ("fsx", "F#"),
    ("vb", "Visual Basic"),
    ("dart", "Dart"),
    ("lua", "Lua"),
    ("r", "R"),
    ("jl", "Julia"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("erl", "Erlang"),
    ("hrl", "Erlang"),
    ("hs", "Haskell"),
    ("ml", "OCaml"),
    ("mli", "OCaml"),
    ("clj", "Clojure"),
    ("cljs", "Clojure"),
    ("groovy", "Groovy"),
    ("pl", "Perl"),
    ("pm", "Perl"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("ps1", "PowerShell"),
    ("psm1", "PowerShell"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("htm", "HTML"),
    ("css", "CSS"),
    ("scss", "SCSS"),
    ("less", "Less"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("zig", "Zig"),
    ("nim", "Nim"),
    ("cr", "Crystal"),
    ("d", "D"),
    ("pas", "Pascal"),
];

// Path components excluded from the byte count: build output, dependency
// stores and editor metadata would otherwise dominate the totals.
const SKIPPED_COMPONENTS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "bin",
    "obj",
    "dist",
    "build",
    ".vs",
    ".idea",
    ".vscode",
    "__pycache__",
    ".next",
    "packages",
];

fn language_for_extension(extension: &str) -> Option<&'static str> {
    let lowered = extension.to_lowercase();
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(ext, _)| *ext == lowered)
        .map(|(_, language)| *language)
}

/// Pick the language owning the most bytes under `dir`, or `None` when no
/// known extension appears at all.
pub fn detect_primary_language(dir: &Path) -> Option<String> {
    let mut totals: HashMap<&'static str, u64> = HashMap::new();

    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .hidden(false)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .is_none_or(|name| !SKIPPED_COMPONENTS.contains(&name))
        })
        .build();

    for result in walker {
        let Ok(entry) = result else { continue };
        if !entry.file_type().is_some_and(|file_type| file_type.is_file()) {
            continue;
        }
        let Some(language) = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(language_for_extension)
        else {
            continue;
        };
        if let Ok(metadata) = entry.metadata() {
            *totals.entry(language).or_default() += metadata.len();
        }
    }

    totals
        .into_iter()
        .max_by_key(|(_, bytes)| *bytes)
        .map(|(language, _)| language.to_string())
}
