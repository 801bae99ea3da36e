
use marker_index::logging::init_logging;
use std::{
    env,
    fs,
};


#[test]
fn installs_once() {
    let path = env::temp_dir().join(format!("marker_index_log_{}.log", std::process::id()));
    assert!(init_logging(Some(&path)).is_ok());
    assert!(path.exists());
    assert!(init_logging(None).is_err());
    let _ = fs::remove_file(&path);
}
