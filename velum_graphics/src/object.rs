//! Per-object lifecycle tag shared by all configurable GPU objects.

use crate::error::{Error, Result};

/// Lifecycle of a GPU object.
///
/// The path is acyclic except for `NeedUpdate -> Created` (after an update
/// reconciles host and device state). `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectStatus {
    Init,
    Created,
    NeedUpdate,
    NeedDestroy,
    Destroyed,
}

impl ObjectStatus {
    pub fn is_created(self) -> bool {
        matches!(self, ObjectStatus::Created | ObjectStatus::NeedUpdate)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: ObjectStatus) -> bool {
        use ObjectStatus::*;
        match (self, to) {
            (Destroyed, _) => false,
            (Init, Created) => true,
            (Init, Destroyed) => true, // never-created objects may still be dropped
            (Created, NeedUpdate) => true,
            (NeedUpdate, Created) => true,
            (Created | NeedUpdate, NeedDestroy) => true,
            (Created | NeedUpdate | NeedDestroy, Destroyed) => true,
            _ => false,
        }
    }

    pub fn transition(&mut self, to: ObjectStatus) -> Result<()> {
        if !self.can_transition(to) {
            return Err(match *self {
                ObjectStatus::Init => Error::NotConfigured("object not created"),
                _ => Error::AlreadyCreated("invalid lifecycle transition"),
            });
        }
        *self = to;
        Ok(())
    }

    /// Guard used by resource-defining setters.
    pub fn ensure_not_created(self, what: &'static str) -> Result<()> {
        if self == ObjectStatus::Init {
            Ok(())
        } else {
            Err(Error::AlreadyCreated(what))
        }
    }

    /// Guard used by operations requiring a live device-side object.
    pub fn ensure_created(self, what: &'static str) -> Result<()> {
        if self.is_created() {
            Ok(())
        } else {
            Err(Error::NotConfigured(what))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ObjectStatus::*;

    const ALL: [ObjectStatus; 5] = [Init, Created, NeedUpdate, NeedDestroy, Destroyed];

    #[test]
    fn destroyed_is_terminal() {
        for to in ALL {
            assert!(!Destroyed.can_transition(to), "Destroyed -> {to:?} allowed");
        }
    }

    #[test]
    fn transition_table() {
        // Exhaustive expectations for the full 5x5 table.
        let allowed = |from: ObjectStatus, to: ObjectStatus| match (from, to) {
            (Init, Created) | (Init, Destroyed) => true,
            (Created, NeedUpdate) | (NeedUpdate, Created) => true,
            (Created, NeedDestroy) | (NeedUpdate, NeedDestroy) => true,
            (Created, Destroyed) | (NeedUpdate, Destroyed) | (NeedDestroy, Destroyed) => true,
            _ => false,
        };
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition(to),
                    allowed(from, to),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn random_walks_end_in_destroyed() {
        // Drive arbitrary transition attempts; any accepted path must be
        // acyclic up to the NeedUpdate <-> Created reconciliation edge and
        // always able to reach Destroyed.
        let mut seed = 0x9e3779b9u32;
        for _ in 0..100 {
            let mut status = Init;
            for _ in 0..50 {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                let to = ALL[(seed >> 16) as usize % ALL.len()];
                let before = status;
                if status.transition(to).is_ok() {
                    assert!(before.can_transition(to));
                } else {
                    assert_eq!(before, status, "failed transition mutated status");
                }
            }
            // Destroyed must be reachable from any live state.
            assert!(status == Destroyed || status.can_transition(Destroyed));
        }
    }

    #[test]
    fn setter_guards() {
        assert!(Init.ensure_not_created("x").is_ok());
        assert!(matches!(
            Created.ensure_not_created("x"),
            Err(Error::AlreadyCreated(_))
        ));
        assert!(Created.ensure_created("x").is_ok());
        assert!(NeedUpdate.ensure_created("x").is_ok());
        assert!(matches!(
            Init.ensure_created("x"),
            Err(Error::NotConfigured(_))
        ));
    }
}
