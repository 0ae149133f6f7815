/// Name of the ephemeral child marking a player as connected.
pub const PRESENCE_MARKER: &str = "online";

/// Join a parent path and a single child segment.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Path of the presence marker for `player` under `root`.
pub fn presence_path(root: &str, player: &str) -> String {
    join(&join(root, player), PRESENCE_MARKER)
}

/// Parent of `path`, or `None` for the namespace root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
