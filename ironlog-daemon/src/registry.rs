//! Builtin plugin set.
//!
//! Every plugin the daemon can place in a stack is registered here,
//! explicitly and in one place.

use anyhow::Result;

use ironlog_core::PluginRegistry;

/// Build the registry with every builtin plugin.
///
/// | name      | kind   | crate          |
/// |-----------|--------|----------------|
/// | `ULOG`    | source | ironlog-packet |
/// | `BASE`    | filter | ironlog-packet |
/// | `ASTARO`  | sink   | ironlog-output |
/// | `SQLITE3` | sink   | ironlog-db     |
pub fn builtin_registry() -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(ironlog_packet::ulog::definition())?;
    registry.register(ironlog_packet::base::definition())?;
    registry.register(ironlog_output::astaro::definition())?;
    registry.register(ironlog_db::sqlite::definition())?;

    tracing::debug!(plugins = ?registry.names(), "builtin plugins registered");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironlog_core::StageKind;

    #[test]
    fn registers_all_builtins() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.count(), 4);
        assert_eq!(registry.get("ULOG").unwrap().kind(), StageKind::Source);
        assert_eq!(registry.get("BASE").unwrap().kind(), StageKind::Filter);
        assert_eq!(registry.get("ASTARO").unwrap().kind(), StageKind::Sink);
        assert_eq!(registry.get("SQLITE3").unwrap().kind(), StageKind::Sink);
    }
}
