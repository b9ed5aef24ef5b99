use super::*;

const VARS: &[&str] = &[
    "PEPPER_WS_URL",
    "PEPPER_PING_INTERVAL_SECS",
    "PEPPER_CONNECT_TIMEOUT_MS",
    "PEPPER_READ_TIMEOUT_MS",
    "PEPPER_WRITE_TIMEOUT_MS",
    "PEPPER_MAX_RETRY_COUNT",
    "PEPPER_INITIAL_BACKOFF_MS",
    "PEPPER_MAX_BACKOFF_MS",
    "PEPPER_BACKOFF_JITTER",
    "PEPPER_CAPTURE_FPS",
    "PEPPER_CHUNK_SIZE",
];

/// # Safety
/// Env mutation races with other tests reading the same variables; every
/// test touching `PEPPER_*` lives in this file and holds `ENV_LOCK`.
unsafe fn clear_pepper_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[test]
fn from_env_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_pepper_env() };

    let cfg = LinkConfig::from_env().unwrap();
    assert_eq!(cfg, LinkConfig::default());
    assert_eq!(cfg.channel.server_url, DEFAULT_SERVER_URL);
    assert_eq!(cfg.channel.retry.max_retries, 5);
    assert_eq!(cfg.channel.retry.initial_backoff, Duration::from_millis(1000));
    assert_eq!(cfg.capture.frame_interval(), Duration::from_millis(100));
    assert_eq!(cfg.chunk_size, 4 * 1024 * 1024);
}

#[test]
fn from_env_parses_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_pepper_env();
        std::env::set_var("PEPPER_WS_URL", "wss://robots.example.test/pepper");
        std::env::set_var("PEPPER_PING_INTERVAL_SECS", "5");
        std::env::set_var("PEPPER_MAX_RETRY_COUNT", "2");
        std::env::set_var("PEPPER_INITIAL_BACKOFF_MS", "250");
        std::env::set_var("PEPPER_CAPTURE_FPS", "4");
        std::env::set_var("PEPPER_CHUNK_SIZE", "65536");
    }

    let cfg = LinkConfig::from_env().unwrap();
    assert_eq!(cfg.channel.server_url, "wss://robots.example.test/pepper");
    assert_eq!(cfg.channel.ping_interval, Duration::from_secs(5));
    assert_eq!(cfg.channel.retry.max_retries, 2);
    assert_eq!(cfg.channel.retry.initial_backoff, Duration::from_millis(250));
    assert_eq!(cfg.capture.frame_interval(), Duration::from_millis(250));
    assert_eq!(cfg.chunk_size, 65536);

    unsafe { clear_pepper_env() };
}

#[test]
fn from_env_ignores_unparsable_numbers() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_pepper_env();
        std::env::set_var("PEPPER_CONNECT_TIMEOUT_MS", "soon");
    }

    let cfg = ChannelConfig::from_env().unwrap();
    assert_eq!(cfg.connect_timeout, Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));

    unsafe { clear_pepper_env() };
}

#[test]
fn from_env_rejects_http_url() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_pepper_env();
        std::env::set_var("PEPPER_WS_URL", "http://127.0.0.1:5003/pepper");
    }

    let err = ChannelConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl(_)));

    unsafe { clear_pepper_env() };
}

#[test]
fn from_env_rejects_zero_fps_and_chunk() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_pepper_env();
        std::env::set_var("PEPPER_CAPTURE_FPS", "0");
    }
    assert_eq!(LinkConfig::from_env().unwrap_err(), ConfigError::ZeroFps);

    unsafe {
        clear_pepper_env();
        std::env::set_var("PEPPER_CHUNK_SIZE", "0");
    }
    assert_eq!(LinkConfig::from_env().unwrap_err(), ConfigError::ZeroChunkSize);

    unsafe { clear_pepper_env() };
}

#[test]
fn frame_interval_guards_zero_fps() {
    let cfg = CaptureConfig { target_fps: 0 };
    assert_eq!(cfg.frame_interval(), Duration::from_millis(1000));
}
