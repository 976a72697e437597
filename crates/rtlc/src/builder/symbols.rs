use crate::HashMap;
use crate::error::{BuildError, Location};
use crate::ir::NodeId;

#[derive(Debug, Clone)]
pub(super) enum Symbol {
    /// Port, wire or memory-port member.
    Node(NodeId),
    /// Named expression (`node` statement); readable, never assignable.
    Value(NodeId),
    Register {
        src: NodeId,
        dst: NodeId,
    },
    Instance {
        module: String,
        ports: HashMap<String, NodeId>,
    },
    /// Memory ports by name, each mapping member names to nodes.
    Memory {
        ports: HashMap<String, HashMap<String, NodeId>>,
    },
}

/// Names visible inside one module instance.
///
/// Each instance gets its own table; `prefix` is the flattened instance path
/// used to derive globally unique node names.
#[derive(Debug)]
pub(super) struct SymbolTable {
    pub module: String,
    pub prefix: String,
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new(module: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            prefix: prefix.into(),
            symbols: HashMap::default(),
        }
    }

    /// Flattened name of a local declaration.
    pub fn qualified(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}${}", self.prefix, name)
        }
    }

    pub fn declare(
        &mut self,
        name: &str,
        symbol: Symbol,
        location: &Location,
    ) -> Result<(), BuildError> {
        if self.symbols.contains_key(name) {
            return Err(BuildError::DuplicateDeclaration {
                module: self.module.clone(),
                name: name.to_owned(),
                location: location.clone(),
            });
        }
        self.symbols.insert(name.to_owned(), symbol);
        Ok(())
    }

    pub fn lookup(&self, name: &str, location: &Location) -> Result<&Symbol, BuildError> {
        self.symbols
            .get(name)
            .ok_or_else(|| BuildError::UndeclaredReference {
                module: self.module.clone(),
                name: name.to_owned(),
                location: location.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclaration_is_rejected() {
        let mut table = SymbolTable::new("Top", "");
        let loc = Location::default();
        table.declare("a", Symbol::Node(NodeId(0)), &loc).unwrap();
        let err = table.declare("a", Symbol::Node(NodeId(1)), &loc).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateDeclaration { name, .. } if name == "a"));
    }

    #[test]
    fn qualified_names_use_instance_prefix() {
        assert_eq!(SymbolTable::new("Top", "").qualified("x"), "x");
        assert_eq!(SymbolTable::new("Alu", "core$alu").qualified("x"), "core$alu$x");
    }
}
