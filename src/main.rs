//! Quarry executable.

use quarry_build_info::Version;

fn main() {
    let version = Version {
        major: pkg_version_part(0),
        minor: pkg_version_part(1),
        patch: pkg_version_part(2),
        dash: option_env!("QUARRY_VERSION_DASH").map(str::to_owned),
        commit_describe: option_env!("QUARRY_COMMIT_DESCRIBE").map(str::to_owned),
    };

    if let Some(exit_code) = quarry_bin::run_app(version).err() {
        ::std::process::exit(exit_code.into());
    }
}

fn pkg_version_part(index: usize) -> u8 {
    env!("CARGO_PKG_VERSION")
        .split('-')
        .next()
        .unwrap_or("0")
        .split('.')
        .nth(index)
        .and_then(|part| part.parse().ok())
        .unwrap_or(0)
}
