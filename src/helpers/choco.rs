use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::helpers::runner::CommandSpec;

/// Packages the prerequisites wizard offers, all selected by default.
pub const DEFAULT_TOOLS: &[&str] = &["git", "python", "nodejs-lts", "vscode"];

pub const POSTGRES_PACKAGE: &str = "postgresql14";

const INSTALL_SCRIPT: &str = "Set-ExecutionPolicy Bypass -Scope Process -Force; \
[System.Net.ServicePointManager]::SecurityProtocol = [System.Net.ServicePointManager]::SecurityProtocol -bor 3072; \
iex ((New-Object System.Net.WebClient).DownloadString('https://community.chocolatey.org/install.ps1'))";

pub fn powershell(description: &str, script: &str) -> CommandSpec {
    CommandSpec::new(description, "powershell.exe").args(["-NoProfile", "-Command", script])
}

pub fn install_chocolatey() -> CommandSpec {
    powershell("Install Chocolatey", INSTALL_SCRIPT)
}

/// `choco install <package> -y`. No `--force`: packages already present are
/// upgraded or skipped by Chocolatey.
pub fn install_package(package: &str, search_path: Option<&OsStr>) -> CommandSpec {
    CommandSpec::new(format!("Install {}", package), "choco")
        .args(["install", package, "-y"])
        .search_path(search_path)
}

/// The admin password only takes effect on first install; later runs leave
/// the existing server alone.
pub fn install_postgres(admin_password: &str, search_path: Option<&OsStr>) -> CommandSpec {
    CommandSpec::new("Install PostgreSQL", "choco")
        .args(["install", POSTGRES_PACKAGE, "--params"])
        .arg(format!("/Password:{}", admin_password))
        .arg("-y")
        .search_path(search_path)
        .secret(admin_password)
}

/// Looks for `choco` on `search_path` (or the inherited `PATH`), then in the
/// Chocolatey install directory.
pub fn locate(search_path: Option<&OsStr>) -> Option<PathBuf> {
    let found = match search_path {
        Some(path) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            which::which_in("choco", Some(path), cwd)
        }
        None => which::which("choco"),
    };
    found.ok().or_else(|| {
        let base = std::env::var_os("ChocolateyInstall")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData\chocolatey"));
        let candidate = base.join("bin").join("choco.exe");
        candidate.exists().then_some(candidate)
    })
}

/// Machine and user `PATH` as currently stored in the registry, so tools
/// installed during this run are found without restarting.
#[cfg(windows)]
pub fn registry_path() -> Option<OsString> {
    use winreg::RegKey;
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};

    let machine: String = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey(r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment")
        .and_then(|key| key.get_value("Path"))
        .unwrap_or_default();
    let user: String = RegKey::predef(HKEY_CURRENT_USER)
        .open_subkey("Environment")
        .and_then(|key| key.get_value("Path"))
        .unwrap_or_default();

    let combined = join_path_lists(&[&machine, &user]);
    (!combined.is_empty()).then(|| OsString::from(expand_percent_vars(&combined)))
}

#[cfg(not(windows))]
pub fn registry_path() -> Option<OsString> {
    None
}

#[cfg_attr(not(windows), allow(dead_code))]
fn join_path_lists(lists: &[&str]) -> String {
    lists
        .iter()
        .flat_map(|list| list.split(';'))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

/// Expands `%VAR%` references the way `REG_EXPAND_SZ` values are stored.
#[cfg_attr(not(windows), allow(dead_code))]
fn expand_percent_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(v) if !name.is_empty() => out.push_str(&v),
                    _ => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_installs_never_force() {
        let spec = install_package("git", None);
        assert_eq!(spec.display().split(' ').skip(1).collect::<Vec<_>>(), ["install", "git", "-y"]);
    }

    #[test]
    fn postgres_password_is_masked() {
        let spec = install_postgres("S3cret!", None);
        let shown = spec.display();
        assert!(shown.contains("postgresql14"));
        assert!(shown.contains("/Password:****"));
        assert!(!shown.contains("S3cret!"));
    }

    #[test]
    fn path_lists_are_joined_without_blanks() {
        assert_eq!(join_path_lists(&["C:\\a; ;C:\\b;", "C:\\c"]), "C:\\a;C:\\b;C:\\c");
    }

    #[test]
    fn unknown_percent_vars_are_left_alone() {
        assert_eq!(
            expand_percent_vars("%RHDEPLOY_SURELY_UNSET%\\bin;100%"),
            "%RHDEPLOY_SURELY_UNSET%\\bin;100%"
        );
    }
}
