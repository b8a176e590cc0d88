//! Administrative commands.
//!
//! Each command produces one reply line starting with `OK` or `ERR`.

use std::fmt::Write as _;

use crate::control::Registry;

/// A parsed management command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Services,
    Pools,
    Backends(String),
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();
        let arg = words.next();
        match (verb.as_str(), arg) {
            ("help", _) => Command::Help,
            ("status", _) => Command::Status,
            ("services", _) => Command::Services,
            ("pools", _) => Command::Pools,
            ("backends", Some(pool)) => Command::Backends(pool.to_string()),
            ("quit", _) | ("exit", _) => Command::Quit,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

/// Run `command` against `registry` and render its reply line.
pub fn execute(registry: &Registry, command: &Command) -> String {
    match command {
        Command::Help => "OK commands: help status services pools backends <pool> quit".to_string(),
        Command::Status => format!("OK switchyard {} operational", env!("CARGO_PKG_VERSION")),
        Command::Services => {
            let services: Vec<String> = registry
                .service_names()
                .into_iter()
                .filter_map(|name| registry.service(&name))
                .map(|svc| {
                    format!(
                        "{}(role={},enabled={},connections={})",
                        svc.name(),
                        svc.role(),
                        svc.is_enabled(),
                        svc.tracker().active_count()
                    )
                })
                .collect();
            format!("OK {}", services.join(" ")).trim_end().to_string()
        }
        Command::Pools => {
            let pools: Vec<String> = registry
                .pool_names()
                .into_iter()
                .filter_map(|name| registry.pool(&name))
                .map(|pool| {
                    format!(
                        "{}(generation={},backends={},ready={})",
                        pool.name(),
                        pool.generation(),
                        pool.backends().len(),
                        pool.ready_len()
                    )
                })
                .collect();
            format!("OK {}", pools.join(" ")).trim_end().to_string()
        }
        Command::Backends(name) => match registry.pool(name) {
            Some(pool) => {
                let mut reply = String::from("OK");
                for backend in pool.backends() {
                    let _ = write!(
                        reply,
                        " {}(generation={},outstanding={})",
                        backend.addr(),
                        backend.generation(),
                        backend.outstanding()
                    );
                }
                reply
            }
            None => format!("ERR pool {:?} not found", name),
        },
        Command::Quit => "OK bye".to_string(),
        Command::Unknown(_) => "ERR unknown command".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::control::Configurable;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("HELP\r\n"), Command::Help);
        assert_eq!(Command::parse("backends web"), Command::Backends("web".to_string()));
        assert_eq!(Command::parse("backends"), Command::Unknown("backends".to_string()));
        assert_eq!(Command::parse("exit"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }

    #[tokio::test]
    async fn replies_describe_registry() {
        let registry = Registry::new(RuntimeConfig::default());
        registry.create_pool("web").unwrap();
        let svc = registry.create_service("front").unwrap();
        svc.set("role", "reverse_proxy").unwrap();

        assert_eq!(
            execute(&registry, &Command::Services),
            "OK front(role=reverse_proxy,enabled=false,connections=0)"
        );
        assert_eq!(
            execute(&registry, &Command::Pools),
            "OK web(generation=0,backends=0,ready=0)"
        );
        assert_eq!(execute(&registry, &Command::Backends("web".into())), "OK");
        assert!(execute(&registry, &Command::Backends("nope".into())).starts_with("ERR"));
        assert_eq!(
            execute(&registry, &Command::Unknown("frobnicate".into())),
            "ERR unknown command"
        );
        registry.shutdown();
    }
}
