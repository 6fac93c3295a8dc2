//! Host system information used in USERID replies

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};

/// Source of the operating system name and the local account name
pub trait SystemInfo: Send + Sync {
    /// Platform name, e.g. `linux` or `windows`
    fn os_name(&self) -> String;

    /// Name of the account this process runs as
    fn user_name(&self) -> String;
}

/// System information read from the running host
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSystemInfo;

impl SystemInfo for OsSystemInfo {
    fn os_name(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn user_name(&self) -> String {
        sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| process_owner(pid.as_u32()))
            .filter(|name| !name.is_empty())
            .or_else(|| {
                ["USER", "LOGNAME", "USERNAME"]
                    .iter()
                    .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            })
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Fixed system information, for embedding hosts that already know the answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSystemInfo {
    pub os_name: String,
    pub user_name: String,
}

impl FixedSystemInfo {
    pub fn new(os_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            os_name: os_name.into(),
            user_name: user_name.into(),
        }
    }
}

impl SystemInfo for FixedSystemInfo {
    fn os_name(&self) -> String {
        self.os_name.clone()
    }

    fn user_name(&self) -> String {
        self.user_name.clone()
    }
}

/// Map a platform name to an RFC 1340 "SYSTEM NAMES" token
pub fn rfc1340_system_name(os_name: &str) -> &'static str {
    let os_name = os_name.to_lowercase();

    if os_name.starts_with("windows") {
        "WIN32"
    } else if os_name.starts_with("mac") {
        "MACOS"
    } else if os_name.starts_with("linux") {
        "UNIX"
    } else if os_name.contains("bsd") {
        "UNIX-BSD"
    } else if os_name == "os/2" {
        "OS/2"
    } else if os_name.contains("unix") {
        "UNIX"
    } else if os_name == "irix" {
        "IRIX"
    } else {
        "UNKNOWN"
    }
}

/// Account name owning the given process, if it can be resolved
pub fn process_owner(pid: u32) -> Option<String> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_user(UpdateKind::OnlyIfNotSet),
    );

    let uid = system.process(pid)?.user_id()?.clone();
    let users = Users::new_with_refreshed_list();
    users.get_user_by_id(&uid).map(|user| user.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_names() {
        assert_eq!(rfc1340_system_name("windows"), "WIN32");
        assert_eq!(rfc1340_system_name("Windows 10"), "WIN32");
        assert_eq!(rfc1340_system_name("mac"), "MACOS");
        assert_eq!(rfc1340_system_name("macos"), "MACOS");
        assert_eq!(rfc1340_system_name("linux"), "UNIX");
        assert_eq!(rfc1340_system_name("bsd"), "UNIX-BSD");
        assert_eq!(rfc1340_system_name("freebsd"), "UNIX-BSD");
        assert_eq!(rfc1340_system_name("os/2"), "OS/2");
        assert_eq!(rfc1340_system_name("unix"), "UNIX");
        assert_eq!(rfc1340_system_name("irix"), "IRIX");
        assert_eq!(rfc1340_system_name("test"), "UNKNOWN");
    }

    #[test]
    fn test_host_values_are_not_empty() {
        let info = OsSystemInfo;
        assert!(!info.os_name().is_empty());
        assert!(!info.user_name().is_empty());
    }
}
