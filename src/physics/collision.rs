//! Collision filtering via bitmask groups per entity tag class

use rapier3d::geometry::InteractionGroups;

/// Tag classes used for collision filtering and kind-like dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    /// Static scenery (ground, walls, rocks)
    Environment,
    /// Player-controlled bodies
    Player,
    /// Pickup items
    Item,
    /// Levers, switches, and other usable props
    Interactable,
    /// The hero NPC
    Hero,
}

impl TagClass {
    /// Membership bit for this class
    pub fn membership(self) -> u32 {
        match self {
            TagClass::Environment => 0b0000_0001,
            TagClass::Player => 0b0000_0010,
            TagClass::Item => 0b0000_0100,
            TagClass::Interactable => 0b0000_1000,
            TagClass::Hero => 0b0001_0000,
        }
    }

    /// Classes this class generates contacts with.
    /// Environment-vs-environment pairs are filtered out entirely; everything
    /// else collides with the world and with players.
    pub fn filter(self) -> u32 {
        let all = TagClass::Environment.membership()
            | TagClass::Player.membership()
            | TagClass::Item.membership()
            | TagClass::Interactable.membership()
            | TagClass::Hero.membership();
        match self {
            TagClass::Environment => all & !TagClass::Environment.membership(),
            TagClass::Player => all,
            TagClass::Item => TagClass::Environment.membership() | TagClass::Player.membership(),
            TagClass::Interactable => {
                TagClass::Environment.membership() | TagClass::Player.membership()
            }
            TagClass::Hero => all & !TagClass::Item.membership(),
        }
    }

    /// Interaction groups for colliders of this class
    pub fn interaction_groups(self) -> InteractionGroups {
        InteractionGroups::new(self.membership().into(), self.filter().into())
    }
}
