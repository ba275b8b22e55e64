//! Generation of the systemd unit that runs the bot host.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct UnitOptions {
    pub description: String,

    /// Absolute path of the `tubewarden` executable
    pub exec: PathBuf,

    pub working_dir: PathBuf,

    /// File with the environment variables, usually the `.env` in `working_dir`
    pub env_file: Option<PathBuf>,

    /// System user to run the service as. Root is used if unset.
    pub user: Option<String>,

    pub restart_delay_secs: u64,
}

/// Renders a unit that keeps `tubewarden run` alive with the restart policy
/// of systemd itself. Configuration errors (exit code 78) are not restarted.
pub fn render_systemd_unit(opts: &UnitOptions) -> String {
    let description = &opts.description;
    let working_dir = opts.working_dir.display();
    let exec = quote(&opts.exec.to_string_lossy());
    let restart_sec = opts.restart_delay_secs;
    let no_restart_status = crate::EXIT_CODE_CONFIG;

    let user = opts
        .user
        .as_ref()
        .map(|user| format!("User={user}\n"))
        .unwrap_or_default();

    let env_file = opts
        .env_file
        .as_ref()
        .map(|env_file| format!("EnvironmentFile={}\n", env_file.display()))
        .unwrap_or_default();

    format!(
        "\
[Unit]
Description={description}
Wants=network-online.target
After=network-online.target

[Service]
Type=simple
{user}WorkingDirectory={working_dir}
{env_file}ExecStart={exec} run
Restart=always
RestartSec={restart_sec}
RestartPreventExitStatus={no_restart_status}
KillSignal=SIGTERM
TimeoutStopSec=15

[Install]
WantedBy=multi-user.target
"
    )
}

/// systemd splits `ExecStart=` on whitespace unless the path is quoted
fn quote(path: &str) -> String {
    if path.contains(char::is_whitespace) {
        format!("\"{}\"", path.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        path.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn renders_full_unit() {
        let unit = render_systemd_unit(&UnitOptions {
            description: "Telegram media bot".to_owned(),
            exec: "/opt/bot/bin/tubewarden".into(),
            working_dir: "/opt/bot".into(),
            env_file: Some("/opt/bot/.env".into()),
            user: Some("bot".to_owned()),
            restart_delay_secs: 10,
        });

        expect![[r#"
            [Unit]
            Description=Telegram media bot
            Wants=network-online.target
            After=network-online.target

            [Service]
            Type=simple
            User=bot
            WorkingDirectory=/opt/bot
            EnvironmentFile=/opt/bot/.env
            ExecStart=/opt/bot/bin/tubewarden run
            Restart=always
            RestartSec=10
            RestartPreventExitStatus=78
            KillSignal=SIGTERM
            TimeoutStopSec=15

            [Install]
            WantedBy=multi-user.target
        "#]]
        .assert_eq(&unit);
    }

    #[test]
    fn quotes_paths_with_spaces() {
        let unit = render_systemd_unit(&UnitOptions {
            description: "bot".to_owned(),
            exec: "/home/me/my bot/tubewarden".into(),
            working_dir: "/home/me/my bot".into(),
            env_file: None,
            user: None,
            restart_delay_secs: 5,
        });

        assert!(unit.contains("ExecStart=\"/home/me/my bot/tubewarden\" run\n"), "{unit}");
        assert!(unit.contains("RestartSec=5\n"), "{unit}");
        assert!(!unit.contains("User="), "{unit}");
        assert!(!unit.contains("EnvironmentFile="), "{unit}");
    }
}
