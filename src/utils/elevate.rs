use std::io;

/// Check if we're running with elevated privileges
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token_handle = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }
        let mut elevation = TOKEN_ELEVATION::default();
        let mut ret_len = 0u32;
        let res = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut std::ffi::c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut ret_len,
        );
        let _ = CloseHandle(token_handle);
        res.is_ok() && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    std::process::Command::new("id")
        .arg("-u")
        .output()
        .map(|output| String::from_utf8_lossy(&output.stdout).trim() == "0")
        .unwrap_or(false)
}

/// Relaunch self with admin privileges (UAC prompt). On success the current
/// process exits and the elevated copy takes over.
#[cfg(windows)]
pub fn run_as_admin() -> io::Result<()> {
    use windows::Win32::UI::Shell::ShellExecuteW;
    use windows::Win32::UI::WindowsAndMessaging::SW_SHOW;
    use windows::core::PCWSTR;

    let exe = std::env::current_exe()?;
    let exe_str = exe.to_string_lossy();
    let args = relaunch_args(std::env::args().skip(1));
    let dir = relaunch_dir()?;

    // Convert strings to wide characters (UTF-16) for Windows API
    let exe_wide: Vec<u16> = exe_str.encode_utf16().chain(Some(0)).collect();
    let verb_wide: Vec<u16> = "runas".encode_utf16().chain(Some(0)).collect();
    let args_wide: Vec<u16> = args.encode_utf16().chain(Some(0)).collect();
    let dir_wide: Vec<u16> = dir.encode_utf16().chain(Some(0)).collect();

    let res = unsafe {
        ShellExecuteW(
            None,
            PCWSTR::from_raw(verb_wide.as_ptr()),
            PCWSTR::from_raw(exe_wide.as_ptr()),
            if args.is_empty() {
                PCWSTR::null()
            } else {
                PCWSTR::from_raw(args_wide.as_ptr())
            },
            PCWSTR::from_raw(dir_wide.as_ptr()),
            SW_SHOW,
        )
    };

    // ShellExecuteW returns a HINSTANCE, > 32 means success
    let result = res.0 as isize;
    if result <= 32 {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("Failed to elevate process. Error code: {}", result),
        ))
    } else {
        std::process::exit(0);
    }
}

#[cfg(not(windows))]
pub fn run_as_admin() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Automatic elevation is only available on Windows; re-run with sudo.",
    ))
}

/// Working directory handed to the elevated copy, so relative paths such as
/// `config.ini` or `--answers` resolve as they did before the relaunch.
pub fn relaunch_dir() -> io::Result<String> {
    Ok(std::env::current_dir()?.to_string_lossy().into_owned())
}

/// Re-quotes arguments for a fresh command line.
pub fn relaunch_args<I>(args: I) -> String
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_check() {
        // Only checks that the probe does not panic
        let _ = is_elevated();
    }

    #[test]
    fn relaunch_keeps_the_working_directory() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(std::path::PathBuf::from(relaunch_dir().unwrap()), cwd);
    }

    #[test]
    fn relaunch_args_quote_spaces() {
        let args = vec!["prereqs".to_string(), "--answers".to_string(), "C:\\My Files\\a.json".to_string()];
        assert_eq!(relaunch_args(args), "prereqs --answers \"C:\\My Files\\a.json\"");
    }
}
