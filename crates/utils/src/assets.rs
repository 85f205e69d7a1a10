use std::path::PathBuf;

use directories::ProjectDirs;

pub fn asset_dir() -> PathBuf {
    let proj = if cfg!(debug_assertions) {
        ProjectDirs::from("dev", "repowiki-dev", "repowiki")
            .expect("OS didn't give us a home directory")
    } else {
        ProjectDirs::from("dev", "repowiki", "repowiki")
            .expect("OS didn't give us a home directory")
    };

    proj.data_dir().to_path_buf()
}

pub fn config_path() -> PathBuf {
    asset_dir().join("config.json")
}
