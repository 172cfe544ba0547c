//! Role catalog and per-match role assignment.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;

/// Group of roles sharing a win condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Faction {
    Mafia,
    Town,
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Faction::Mafia => f.write_str("Mafia"),
            Faction::Town => f.write_str("Town"),
        }
    }
}

/// What a role may submit during the night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NightVerb {
    Kill,
    Heal,
}

impl NightVerb {
    pub fn command(&self) -> &'static str {
        match self {
            NightVerb::Kill => "/kill",
            NightVerb::Heal => "/heal",
        }
    }
}

/// A role is described by value: its faction and its night capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Role {
    pub name: &'static str,
    pub faction: Faction,
    pub night: Option<NightVerb>,
}

impl Role {
    pub const MAFIA: Role = Role {
        name: "Mafia",
        faction: Faction::Mafia,
        night: Some(NightVerb::Kill),
    };
    pub const DOCTOR: Role = Role {
        name: "Doctor",
        faction: Faction::Town,
        night: Some(NightVerb::Heal),
    };
    pub const VILLAGER: Role = Role {
        name: "Villager",
        faction: Faction::Town,
        night: None,
    };

    /// Text for the `AKSIYON:` line sent at nightfall.
    pub fn night_hint(&self) -> String {
        match self.night {
            Some(NightVerb::Kill) => "/kill <name> chooses tonight's victim".to_string(),
            Some(NightVerb::Heal) => "/heal <name> protects one player tonight".to_string(),
            None => "none, wait for the day".to_string(),
        }
    }
}

/// Sizing rule for the role pool of an `n`-player match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub players_per_mafia: usize,
    pub doctors: usize,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            players_per_mafia: 4,
            doctors: 1,
        }
    }
}

impl RolePolicy {
    /// One mafia seat per `players_per_mafia` players (at least one), then
    /// doctors, then villagers for every remaining seat.
    pub fn pool(&self, players: usize) -> Vec<Role> {
        if players == 0 {
            return Vec::new();
        }
        let mafia = (players / self.players_per_mafia.max(1)).max(1).min(players);
        let doctors = self.doctors.min(players - mafia);
        let villagers = players - mafia - doctors;

        let mut pool = Vec::with_capacity(players);
        pool.extend(std::iter::repeat(Role::MAFIA).take(mafia));
        pool.extend(std::iter::repeat(Role::DOCTOR).take(doctors));
        pool.extend(std::iter::repeat(Role::VILLAGER).take(villagers));
        pool
    }
}

/// Role of every participant, fixed for the lifetime of a match.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<String, Role>,
}

impl RoleRegistry {
    /// Deals a shuffled pool, one seat per player.
    pub fn assign<R: Rng + ?Sized>(players: &[String], policy: &RolePolicy, rng: &mut R) -> Self {
        let mut pool = policy.pool(players.len());
        pool.shuffle(rng);
        Self::from_pairs(players.iter().cloned().zip(pool))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Role)>) -> Self {
        Self {
            roles: pairs.into_iter().collect(),
        }
    }

    pub fn role_of(&self, player: &str) -> Option<Role> {
        self.roles.get(player).copied()
    }

    pub fn faction_of(&self, player: &str) -> Option<Faction> {
        self.role_of(player).map(|role| role.faction)
    }

    /// Members of `faction`, sorted by name.
    pub fn members_of(&self, faction: Faction) -> Vec<String> {
        let mut members: Vec<String> = self
            .roles
            .iter()
            .filter(|(_, role)| role.faction == faction)
            .map(|(name, _)| name.clone())
            .collect();
        members.sort();
        members
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{}", i)).collect()
    }

    fn count(pool: &[Role], role: Role) -> usize {
        pool.iter().filter(|r| **r == role).count()
    }

    #[test]
    fn test_four_player_pool() {
        let pool = RolePolicy::default().pool(4);
        assert_eq!(pool.len(), 4);
        assert_eq!(count(&pool, Role::MAFIA), 1);
        assert_eq!(count(&pool, Role::DOCTOR), 1);
        assert_eq!(count(&pool, Role::VILLAGER), 2);
    }

    #[test]
    fn test_pool_scales_mafia_with_player_count() {
        let pool = RolePolicy::default().pool(9);
        assert_eq!(count(&pool, Role::MAFIA), 2);
        assert_eq!(count(&pool, Role::DOCTOR), 1);
        assert_eq!(count(&pool, Role::VILLAGER), 6);
    }

    #[test]
    fn test_small_pool_keeps_one_mafia() {
        let pool = RolePolicy::default().pool(2);
        assert_eq!(count(&pool, Role::MAFIA), 1);
        assert_eq!(count(&pool, Role::DOCTOR), 1);
        assert!(RolePolicy::default().pool(0).is_empty());
    }

    #[test]
    fn test_assign_gives_every_player_one_role() {
        let players = names(6);
        let mut rng = StdRng::seed_from_u64(7);
        let registry = RoleRegistry::assign(&players, &RolePolicy::default(), &mut rng);

        assert_eq!(registry.len(), 6);
        for p in &players {
            assert!(registry.role_of(p).is_some());
        }
        assert_eq!(registry.members_of(Faction::Mafia).len(), 1);
        assert_eq!(registry.members_of(Faction::Town).len(), 5);
        assert_eq!(registry.role_of("stranger"), None);
    }

    #[test]
    fn test_assignment_is_reproducible_with_seed() {
        let players = names(8);
        let a = RoleRegistry::assign(&players, &RolePolicy::default(), &mut StdRng::seed_from_u64(42));
        let b = RoleRegistry::assign(&players, &RolePolicy::default(), &mut StdRng::seed_from_u64(42));
        for p in &players {
            assert_eq!(a.role_of(p), b.role_of(p));
        }
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(Role::MAFIA.night, Some(NightVerb::Kill));
        assert_eq!(Role::DOCTOR.faction, Faction::Town);
        assert_eq!(Role::VILLAGER.night, None);
        assert!(Role::MAFIA.night_hint().starts_with("/kill"));
    }
}
