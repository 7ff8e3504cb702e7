use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};

use stockpile::config::{ConfigLoader, SlotBackend};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("STOCKPILE_"))
        .collect();
    for key in keys {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn loads_defaults_when_only_a_token_is_set() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("STOCKPILE_OPERATOR_TOKEN", "local-token");
    }

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.operator_tokens, vec!["local-token".to_string()]);
    assert_eq!(cfg.concurrency.backend, SlotBackend::Memory);
    assert_eq!(cfg.workers.restore.max_concurrency, 1);
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "STOCKPILE_PROFILE=staging\nSTOCKPILE_OPERATOR_TOKENS=a,b\nSTOCKPILE_LOG_LEVEL=warn\n",
    );
    write_env_file(&dir, ".env.local", "STOCKPILE_LOG_LEVEL=info\n");
    write_env_file(
        &dir,
        ".env.staging",
        "STOCKPILE_API_BIND_ADDR=127.0.0.1:9090\nSTOCKPILE_WORKER_IMPORT_MAX_CONCURRENCY=3\n",
    );
    write_env_file(&dir, ".env.staging.local", "STOCKPILE_LOG_LEVEL=debug\n");

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();

    assert_eq!(cfg.profile, "staging");
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.api_bind_addr, "127.0.0.1:9090");
    assert_eq!(cfg.operator_tokens, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(cfg.workers.import.max_concurrency, 3);
    clear_env();
}

#[test]
fn process_environment_overrides_files() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "STOCKPILE_OPERATOR_TOKEN=file-token\nSTOCKPILE_SLOT_BACKEND=memory\n",
    );
    unsafe {
        env::set_var("STOCKPILE_SLOT_BACKEND", "database");
    }

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();

    assert_eq!(cfg.concurrency.backend, SlotBackend::Database);
    assert_eq!(cfg.operator_tokens, vec!["file-token".to_string()]);
    clear_env();
}

#[test]
fn missing_operator_token_fails() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    let result = ConfigLoader::with_base_dir(dir.path().to_path_buf()).load();
    assert!(result.is_err());
}
