pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build metadata, filled from `FLEET_BUILD_*` at compile time when present.
pub fn build_info() -> String {
    format!(
        "sha={}; ref={}; built_at={}; os_arch={}/{}",
        option_env!("FLEET_BUILD_SHA").unwrap_or("HEAD"),
        option_env!("FLEET_BUILD_REF").unwrap_or("HEAD"),
        option_env!("FLEET_BUILD_DATE").unwrap_or("now"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}
