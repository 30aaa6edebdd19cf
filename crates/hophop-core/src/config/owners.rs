use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: u64,
    pub name: String,
}

/// Server owners, in file order. Read from `owners.toml`:
///
/// ```toml
/// [[owner]]
/// id = 76561198000000000
/// name = "Admin"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerList {
    #[serde(default, rename = "owner")]
    pub owners: Vec<Owner>,
}

impl OwnerList {
    /// A missing file yields an empty list.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(CoreError::io("reading owner list", err)),
        };
        toml::from_str(&contents)
            .map_err(|err| CoreError::InvalidConfig(format!("owners.toml: {err}")))
    }

    /// `users.cfg` body: one `ownerid <id> "<name>"` line per owner.
    pub fn render(&self) -> String {
        self.owners
            .iter()
            .map(|owner| format!("ownerid {} \"{}\"", owner.id, owner.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::OwnerList;

    #[test]
    fn renders_in_file_order() {
        let list: OwnerList = toml::from_str(
            "[[owner]]\nid = 76561198183150138\nname = \"Clayton\"\n\n[[owner]]\nid = 76561198091394287\nname = \"Demonic\"\n",
        )
        .expect("parse owners");

        assert_eq!(
            list.render(),
            "ownerid 76561198183150138 \"Clayton\"\nownerid 76561198091394287 \"Demonic\""
        );
    }

    #[test]
    fn missing_file_is_empty() {
        let list = OwnerList::load(std::path::Path::new("/nonexistent/owners.toml"))
            .expect("missing file is not an error");
        assert!(list.owners.is_empty());
        assert_eq!(list.render(), "");
    }
}
