use std::env;
use std::path::PathBuf;

/// Where the keeper finds tmux, its sockets and its session store.
///
/// Built once at process entry and passed down; nothing below `main` reads
/// the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the tmux control sockets
    pub socket_dir: PathBuf,
    /// Socket new sessions are created on
    pub socket: PathBuf,
    /// JSON file with the session records
    pub store_path: PathBuf,
    /// tmux binary
    pub tmux_bin: PathBuf,
}

impl Config {
    pub const SOCKET_DIR_VAR: &'static str = "TMUX_KEEPER_SOCKET_DIR";
    pub const SOCKET_VAR: &'static str = "TMUX_KEEPER_SOCKET";
    pub const STORE_VAR: &'static str = "TMUX_KEEPER_STORE";
    pub const BIN_VAR: &'static str = "TMUX_KEEPER_BIN";

    /// Resolve defaults, letting `TMUX_KEEPER_*` variables override them.
    pub fn from_env() -> Self {
        Self::resolve(|key| env::var_os(key).map(PathBuf::from))
    }

    fn resolve(lookup: impl Fn(&str) -> Option<PathBuf>) -> Self {
        let socket_dir = lookup(Self::SOCKET_DIR_VAR).unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(env::temp_dir)
                .join("tmux-keeper-sockets")
        });
        let socket = lookup(Self::SOCKET_VAR).unwrap_or_else(|| socket_dir.join("tmux-keeper.sock"));
        let store_path = lookup(Self::STORE_VAR)
            .unwrap_or_else(|| env::temp_dir().join("tmux-keeper-sessions.json"));
        let tmux_bin = lookup(Self::BIN_VAR).unwrap_or_else(|| PathBuf::from("tmux"));

        Self {
            socket_dir,
            socket,
            store_path,
            tmux_bin,
        }
    }

    /// Create the socket directory so tmux can bind there.
    pub fn ensure_socket_dir(&self) -> std::io::Result<()> {
        let dir = self.socket.parent().unwrap_or(&self.socket_dir);
        std::fs::create_dir_all(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_socket_follows_socket_dir() {
        let vars: HashMap<&str, PathBuf> =
            HashMap::from([(Config::SOCKET_DIR_VAR, PathBuf::from("/run/keeper"))]);
        let config = Config::resolve(|key| vars.get(key).cloned());

        assert_eq!(config.socket, PathBuf::from("/run/keeper/tmux-keeper.sock"));
        assert_eq!(config.tmux_bin, PathBuf::from("tmux"));
        assert!(config.store_path.ends_with("tmux-keeper-sessions.json"));
    }

    #[test]
    fn test_explicit_overrides_win() {
        let vars: HashMap<&str, PathBuf> = HashMap::from([
            (Config::SOCKET_VAR, PathBuf::from("/tmp/other.sock")),
            (Config::STORE_VAR, PathBuf::from("/var/lib/keeper.json")),
            (Config::BIN_VAR, PathBuf::from("/opt/bin/tmux")),
        ]);
        let config = Config::resolve(|key| vars.get(key).cloned());

        assert_eq!(config.socket, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.store_path, PathBuf::from("/var/lib/keeper.json"));
        assert_eq!(config.tmux_bin, PathBuf::from("/opt/bin/tmux"));
    }

    #[test]
    fn test_ensure_socket_dir_creates_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            socket_dir: tmp.path().join("sockets"),
            socket: tmp.path().join("sockets").join("k.sock"),
            store_path: tmp.path().join("store.json"),
            tmux_bin: PathBuf::from("tmux"),
        };
        config.ensure_socket_dir().unwrap();
        assert!(tmp.path().join("sockets").is_dir());
    }
}
