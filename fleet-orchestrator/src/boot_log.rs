//! Boot completion detection over a server's console output.
//!
//! Both matchers work line by line on whatever prefix of the console the
//! cloud returned. Once a log classifies as finished, any longer capture of
//! the same console does too.

use fleet_common::BootMechanism;
use regex::Regex;
use std::sync::LazyLock;

static CLOUD_INIT_FINISHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*Cloud-init v\. \S+ finished at.*$").expect("static regex")
});

static SSH_HOST_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SSH host key: \S+:\S+ (\S+)$").expect("static regex"));

static LOGIN_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+ login: .*$").expect("static regex"));

/// True when any line carries the cloud-init completion banner.
pub fn is_cloud_init_finished(log: &str) -> bool {
    log.lines().any(|line| CLOUD_INIT_FINISHED.is_match(line))
}

/// Progress of the ordered host-key then login-prompt scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnitionScan {
    SeekingHostKey,
    SeekingLogin,
    Found,
}

impl IgnitionScan {
    /// Advances the scan by one console line.
    ///
    /// A line that completes the host-key phase is never itself considered
    /// as a login prompt.
    pub fn step(self, line: &str) -> Self {
        match self {
            IgnitionScan::SeekingHostKey if SSH_HOST_KEY.is_match(line) => {
                IgnitionScan::SeekingLogin
            }
            IgnitionScan::SeekingLogin if LOGIN_PROMPT.is_match(line) => IgnitionScan::Found,
            other => other,
        }
    }
}

/// True when a login prompt appears on a line after an SSH host key line.
///
/// Images provisioned by ignition (Flatcar, Fedora CoreOS) print no
/// completion banner, and a getty prompt can show up before the final boot
/// stage, so the host key announcement is required first.
pub fn is_ignition_finished(log: &str) -> bool {
    let mut state = IgnitionScan::SeekingHostKey;
    for line in log.lines() {
        state = state.step(line);
        if state == IgnitionScan::Found {
            return true;
        }
    }
    false
}

/// Runs the matcher that belongs to `mechanism`.
pub fn is_boot_finished(mechanism: BootMechanism, log: &str) -> bool {
    match mechanism {
        BootMechanism::CloudInit => is_cloud_init_finished(log),
        BootMechanism::Ignition => is_ignition_finished(log),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU_PARTIAL: &str = "\
[    0.000000] Linux version 5.15.0-91-generic (buildd@lcy02-amd64-045)
[    3.412093] systemd[1]: Detected virtualization kvm.
[   10.004129] cloud-init[610]: Cloud-init v. 23.3.3-0ubuntu0~22.04.1 running 'init' at Tue, 09 Jan 2024 10:12:01 +0000. Up 9.81 seconds.
[   12.880113] cloud-init[610]: ci-info: ++++++++++++++++++++++++++++Net device info+++++++++++++++++++++++++++++
";

    const UBUNTU_FINISHED_TAIL: &str = "\
[   21.553812] cloud-init[1042]: #############################################################
[   21.601233] cloud-init[1042]: Cloud-init v. 23.3.3-0ubuntu0~22.04.1 finished at Tue, 09 Jan 2024 10:12:13 +0000. Datasource DataSourceOpenStackLocal [net,ver=2].  Up 21.59 seconds
";

    const FLATCAR_PARTIAL: &str = "\
[    0.000000] Linux version 6.1.73-flatcar (build@pony-truck.infra.kinvolk.io)
[    1.972418] ignition[512]: Ignition 2.18.0
[    2.004411] ignition[512]: Stage: fetch
This is localhost (Linux x86_64 6.1.73-flatcar) 10:12:04

localhost login: \r
";

    const FLATCAR_FINISHED_TAIL: &str = "\
SSH host key: SHA256:Tt1O7nqGMPhg3f3Y0ZqvgRDGS3Fz0s6w9eS0Eq8nD2w (ECDSA)
SSH host key: SHA256:5oCW8kZQpeGmA7s1uEIR3o1xA3bT3bN0m3vNf0JfZoY (ED25519)
eth0: 10.0.0.12 fe80::f816:3eff:fe4c:aa01

runner-7 login: \r
";

    #[test]
    fn cloud_init_banner_anywhere() {
        assert!(!is_cloud_init_finished(UBUNTU_PARTIAL));

        let full = format!("{}{}", UBUNTU_PARTIAL, UBUNTU_FINISHED_TAIL);
        assert!(is_cloud_init_finished(&full));

        let noisy = format!("{}noise after the banner\nmore noise\n", full);
        assert!(is_cloud_init_finished(&noisy));
    }

    #[test]
    fn cloud_init_running_banner_is_not_completion() {
        assert!(!is_cloud_init_finished(
            "Cloud-init v. 23.1 running 'modules:final' at Tue, 09 Jan 2024"
        ));
        assert!(is_cloud_init_finished(
            "Cloud-init v. 23.1 finished at Tue, 09 Jan 2024 10:12:13 +0000"
        ));
        assert!(!is_cloud_init_finished(""));
    }

    #[test]
    fn ignition_needs_host_key_before_login() {
        // Early getty prompt alone is not enough.
        assert!(!is_ignition_finished(FLATCAR_PARTIAL));

        let full = format!("{}{}", FLATCAR_PARTIAL, FLATCAR_FINISHED_TAIL);
        assert!(is_ignition_finished(&full));
    }

    #[test]
    fn ignition_login_before_host_key_is_not_enough() {
        let log = "runner-1 login: \nSSH host key: SHA256:abc (RSA)\n";
        assert!(!is_ignition_finished(log));

        let log = "SSH host key: SHA256:abc (RSA)\nrunner-1 login: \n";
        assert!(is_ignition_finished(log));
    }

    #[test]
    fn ignition_scan_state_machine() {
        let host_key = "SSH host key: SHA256:abc (RSA)";
        let login = "localhost login: ";

        assert_eq!(
            IgnitionScan::SeekingHostKey.step(login),
            IgnitionScan::SeekingHostKey
        );
        assert_eq!(
            IgnitionScan::SeekingHostKey.step(host_key),
            IgnitionScan::SeekingLogin
        );
        assert_eq!(
            IgnitionScan::SeekingLogin.step(host_key),
            IgnitionScan::SeekingLogin
        );
        assert_eq!(IgnitionScan::SeekingLogin.step(login), IgnitionScan::Found);
        assert_eq!(IgnitionScan::Found.step("anything"), IgnitionScan::Found);
    }

    #[test]
    fn dispatch_by_mechanism() {
        let cloud_init = "Cloud-init v. 23.1 finished at Tue";
        assert!(is_boot_finished(BootMechanism::CloudInit, cloud_init));
        assert!(!is_boot_finished(BootMechanism::Ignition, cloud_init));
    }
}
