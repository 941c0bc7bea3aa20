//! Host detection tests for `fleetsync-detector`.
//!
//! Each test builds its own fake root in a `TempDir`: no shared state.

use fleetsync_detector::{
    detect_host, detect_primary_user, parse_passwd, DetectError, HostProbe, SystemPackageManager,
};
use rstest::rstest;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
svc:x:1000:1000::/srv/svc:/usr/sbin/nologin
dev:x:1001:1001:Developer:/home/dev:/bin/bash
ops:x:1002:1002::/home/ops:/bin/zsh
";

fn make_root(os_release: &str, passwd: &str) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("etc")).expect("mkdir etc");
    fs::write(dir.path().join("etc/os-release"), os_release).expect("os-release");
    fs::write(dir.path().join("etc/passwd"), passwd).expect("passwd");
    dir
}

fn add_executable(dir: &Path, name: &str) {
    fs::create_dir_all(dir).expect("mkdir bin");
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\nexit 0\n").expect("write exe");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[test]
fn primary_user_is_first_regular_account_with_login_shell() {
    let accounts = parse_passwd(PASSWD);
    let user = detect_primary_user(&accounts).expect("primary user");
    assert_eq!(user.name, "dev");
    assert_eq!(user.uid, 1001);
    assert_eq!(user.home, Path::new("/home/dev"));
}

#[test]
fn configured_user_overrides_detection() {
    let root = make_root("ID=debian\n", PASSWD);
    let probe = HostProbe::new(root.path(), vec![]);
    let host = detect_host(&probe, Some("ops")).expect("detect");
    assert_eq!(host.primary_user.expect("user").name, "ops");
}

#[test]
fn unknown_configured_user_is_an_error() {
    let root = make_root("ID=debian\n", PASSWD);
    let probe = HostProbe::new(root.path(), vec![]);
    let err = detect_host(&probe, Some("ghost")).unwrap_err();
    assert!(matches!(err, DetectError::UnknownUser { ref name } if name == "ghost"));
}

#[test]
fn no_regular_users_yields_none() {
    let root = make_root("ID=alpine\n", "root:x:0:0:root:/root:/bin/ash\n");
    let probe = HostProbe::new(root.path(), vec![]);
    let host = detect_host(&probe, None).expect("detect");
    assert!(host.primary_user.is_none());
}

#[test]
fn missing_release_and_passwd_still_detect() {
    let root = TempDir::new().expect("tempdir");
    let probe = HostProbe::new(root.path(), vec![]);
    let host = detect_host(&probe, None).expect("detect");
    assert_eq!(host.os.id, "linux");
    assert!(host.primary_user.is_none());
    assert!(host.package_manager.is_none());
}

// ---------------------------------------------------------------------------
// Package managers
// ---------------------------------------------------------------------------

#[rstest]
#[case("ID=debian\nVERSION_ID=\"12\"\n", "apt-get", SystemPackageManager::Apt)]
#[case("ID=ubuntu\nID_LIKE=debian\n", "apt-get", SystemPackageManager::Apt)]
#[case("ID=alpine\nVERSION_ID=3.20.1\n", "apk", SystemPackageManager::Apk)]
#[case("ID=fedora\nVERSION_ID=40\n", "dnf", SystemPackageManager::Dnf)]
#[case("ID=centos\nID_LIKE=\"rhel fedora\"\n", "yum", SystemPackageManager::Dnf)]
fn package_manager_detection(
    #[case] os_release: &str,
    #[case] executable: &str,
    #[case] expected: SystemPackageManager,
) {
    let root = make_root(os_release, PASSWD);
    let bin = root.path().join("usr/bin");
    add_executable(&bin, executable);
    let probe = HostProbe::new(root.path(), vec![bin]);
    let host = detect_host(&probe, None).expect("detect");
    assert_eq!(host.package_manager, Some(expected));
}

#[test]
fn os_family_preference_breaks_ties() {
    let root = make_root("ID=alpine\n", PASSWD);
    let bin = root.path().join("bin");
    add_executable(&bin, "apt-get");
    add_executable(&bin, "apk");
    let probe = HostProbe::new(root.path(), vec![bin]);
    let host = detect_host(&probe, None).expect("detect");
    assert_eq!(host.package_manager, Some(SystemPackageManager::Apk));
}

#[test]
fn unknown_family_falls_back_to_any_available_manager() {
    let root = make_root("ID=wolfi\n", PASSWD);
    let bin = root.path().join("bin");
    add_executable(&bin, "apk");
    let probe = HostProbe::new(root.path(), vec![bin]);
    assert_eq!(
        detect_host(&probe, None).expect("detect").package_manager,
        Some(SystemPackageManager::Apk)
    );
}

#[cfg(unix)]
#[test]
fn non_executable_files_are_ignored() {
    let root = make_root("ID=debian\n", PASSWD);
    let bin = root.path().join("bin");
    fs::create_dir_all(&bin).expect("mkdir");
    fs::write(bin.join("apt-get"), "not executable").expect("write");
    let probe = HostProbe::new(root.path(), vec![bin]);
    assert!(!probe.has_executable("apt-get"));
    assert!(detect_host(&probe, None).expect("detect").package_manager.is_none());
}
