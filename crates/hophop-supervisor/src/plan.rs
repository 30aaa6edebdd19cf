use std::collections::BTreeMap;
use std::path::PathBuf;

use hophop_core::config::ServerConfig;
use hophop_utils::ProjectPaths;

/// Everything needed to spawn the game server once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
}

impl LaunchPlan {
    pub fn from_config(config: &ServerConfig, paths: &ProjectPaths) -> Self {
        let server = &paths.server_dir;
        let mut args: Vec<String> = vec![
            "-batchmode".into(),
            "+server.secure".into(),
            "1".into(),
            "+server.tickrate".into(),
            "30".into(),
            "+server.identity".into(),
            "carbon".into(),
        ];
        let mut push = |key: &str, value: String| {
            args.push(key.to_string());
            args.push(value);
        };
        push("+server.port", config.server_port.to_string());
        push("+server.queryport", config.query_port.to_string());
        push("+rcon.port", config.rcon_port.to_string());
        push("+server.hostname", config.server_name.clone());
        push("+server.seed", config.map_seed.to_string());
        push("+server.worldsize", config.map_size.to_string());
        push("+rcon.password", config.rcon_password.clone());
        push("+rcon.web", "true".into());
        push("+server.maxplayers", config.max_players.to_string());
        push("+app.port", config.app_port.to_string());
        for (key, value) in [
            ("+app.listenip", &config.app_listen_ip),
            ("+app.publicip", &config.app_public_ip),
            ("+server.levelurl", &config.level_url),
        ] {
            if !value.trim().is_empty() {
                push(key, value.trim().to_string());
            }
        }

        let mut env = BTreeMap::new();
        env.insert("TERM".to_string(), "xterm".to_string());
        env.insert("DOORSTOP_ENABLED".to_string(), "1".to_string());
        env.insert(
            "DOORSTOP_TARGET_ASSEMBLY".to_string(),
            server
                .join("carbon/managed/Carbon.Preloader.dll")
                .display()
                .to_string(),
        );
        env.insert(
            "LD_PRELOAD".to_string(),
            server.join("libdoorstop.so").display().to_string(),
        );
        env.insert(
            "LD_LIBRARY_PATH".to_string(),
            server
                .join("RustDedicated_Data/Plugins/x86_64")
                .display()
                .to_string(),
        );

        Self {
            program: paths.server_binary(),
            args,
            env,
            cwd: server.clone(),
        }
    }

    /// Human-readable command line for logs. The RCON password is masked.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("****".into());
                mask_next = false;
                continue;
            }
            mask_next = arg == "+rcon.password";
            parts.push(if arg.contains(' ') {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            });
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == key)
            .and_then(|idx| args.get(idx + 1))
            .map(String::as_str)
    }

    #[test]
    fn optional_flags_only_when_set() {
        let paths = ProjectPaths::new("/srv/hophop");
        let config = ServerConfig::from_lookup(|_| None).expect("config");
        let plan = LaunchPlan::from_config(&config, &paths);

        assert_eq!(plan.program, PathBuf::from("/srv/hophop/rust_server/RustDedicated"));
        assert_eq!(plan.cwd, PathBuf::from("/srv/hophop/rust_server"));
        assert_eq!(value_after(&plan.args, "+app.port"), Some("28082"));
        assert_eq!(value_after(&plan.args, "+server.hostname"), Some("HopHop Build server | Main"));
        assert!(!plan.args.iter().any(|arg| arg == "+app.listenip"));
        assert!(!plan.args.iter().any(|arg| arg == "+server.levelurl"));
        assert_eq!(
            plan.env.get("LD_PRELOAD").map(String::as_str),
            Some("/srv/hophop/rust_server/libdoorstop.so")
        );

        let config = ServerConfig::from_lookup(|key| match key {
            "APP_LISTENIP" => Some("0.0.0.0".into()),
            "SERVER_LEVEL_URL" => Some("https://maps.example/custom.map".into()),
            _ => None,
        })
        .expect("config");
        let plan = LaunchPlan::from_config(&config, &paths);
        assert_eq!(value_after(&plan.args, "+app.listenip"), Some("0.0.0.0"));
        assert_eq!(
            value_after(&plan.args, "+server.levelurl"),
            Some("https://maps.example/custom.map")
        );
        assert!(!plan.args.iter().any(|arg| arg == "+app.publicip"));
    }

    #[test]
    fn display_masks_the_password() {
        let paths = ProjectPaths::new("/srv/hophop");
        let config = ServerConfig::from_lookup(|_| None).expect("config");
        let shown = LaunchPlan::from_config(&config, &paths).display_command();

        assert!(shown.contains("+rcon.password ****"));
        assert!(!shown.contains("avoid-unelected-thee"));
        assert!(shown.contains("\"HopHop Build server | Main\""));
    }
}
