use serde::{Deserialize, Serialize};

/// The four substances a pipe tile can carry.
///
/// Each substance has fully independent topology on the same physical tiles:
/// its own connection mask, its own extractor mask, and its own network
/// membership. Distribution policy is chosen by substance in `conduit-net`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Substance {
    Item,
    Fluid,
    Energy,
    Data,
}

impl Substance {
    /// All four substances, in slot order.
    pub fn all() -> [Substance; 4] {
        [
            Substance::Item,
            Substance::Fluid,
            Substance::Energy,
            Substance::Data,
        ]
    }

    /// Slot index: Item=0, Fluid=1, Energy=2, Data=3.
    pub fn index(&self) -> usize {
        match self {
            Substance::Item => 0,
            Substance::Fluid => 1,
            Substance::Energy => 2,
            Substance::Data => 3,
        }
    }
}
