use std::fmt;
use std::str::FromStr;

/// Role is the part a node currently plays in the primary/backup/spare topology.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Primary,
    Backup,
    /// Every node starts as a spare until its first identification pass.
    Spare,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "PRIMARY",
            Role::Backup => "BACKUP",
            Role::Spare => "SPARE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIMARY" => Ok(Role::Primary),
            "BACKUP" => Ok(Role::Backup),
            "SPARE" => Ok(Role::Spare),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// RoleSnapshot is what a node publishes after each role or alone-flag change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RoleSnapshot {
    pub role: Role,
    /// True while a primary believes it has no backup to forward writes to.
    pub alone: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_round_trip_through_wire_form() {
        for role in [Role::Primary, Role::Backup, Role::Spare].iter() {
            assert_eq!(*role, role.as_str().parse::<Role>().unwrap());
        }
        assert!("LEADER".parse::<Role>().is_err());
    }
}
