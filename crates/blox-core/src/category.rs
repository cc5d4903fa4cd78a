//! Upstream resource categories.
//!
//! Every outbound call belongs to exactly one category. The category selects
//! the upstream host, the cache TTL and the rate budget the call draws from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Resource category of an upstream API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    /// User profiles and lookups
    Users,
    /// Game (universe/place) details
    Games,
    /// Groups, roles and members
    Groups,
    /// Asset details
    Assets,
    /// Resale data, currency and transactions
    Economy,
    /// Catalog search and bundles
    Catalog,
    /// Avatar appearance and outfits
    Avatars,
    /// User inventories and collectibles
    Inventory,
    /// Friend lists and requests
    Friends,
    /// Badges and award dates
    Badges,
    /// Real-time presence
    Presence,
    /// Thumbnail URLs
    Thumbnails,
}

impl ResourceCategory {
    /// All categories, in declaration order
    pub const ALL: [Self; 12] = [
        Self::Users,
        Self::Games,
        Self::Groups,
        Self::Assets,
        Self::Economy,
        Self::Catalog,
        Self::Avatars,
        Self::Inventory,
        Self::Friends,
        Self::Badges,
        Self::Presence,
        Self::Thumbnails,
    ];

    /// Lowercase name used in cache keys, metrics labels and config
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Games => "games",
            Self::Groups => "groups",
            Self::Assets => "assets",
            Self::Economy => "economy",
            Self::Catalog => "catalog",
            Self::Avatars => "avatars",
            Self::Inventory => "inventory",
            Self::Friends => "friends",
            Self::Badges => "badges",
            Self::Presence => "presence",
            Self::Thumbnails => "thumbnails",
        }
    }

    /// Default upstream host serving this category
    #[must_use]
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Users => "https://users.roblox.com",
            Self::Games => "https://games.roblox.com",
            Self::Groups => "https://groups.roblox.com",
            Self::Assets | Self::Economy => "https://economy.roblox.com",
            Self::Catalog => "https://catalog.roblox.com",
            Self::Avatars => "https://avatar.roblox.com",
            Self::Inventory => "https://inventory.roblox.com",
            Self::Friends => "https://friends.roblox.com",
            Self::Badges => "https://badges.roblox.com",
            Self::Presence => "https://presence.roblox.com",
            Self::Thumbnails => "https://thumbnails.roblox.com",
        }
    }

    /// Default cache TTL for responses in this category
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::Users | Self::Assets | Self::Badges | Self::Thumbnails => {
                Duration::from_secs(60 * 60)
            }
            Self::Groups | Self::Avatars => Duration::from_secs(30 * 60),
            Self::Games => Duration::from_secs(15 * 60),
            Self::Catalog => Duration::from_secs(10 * 60),
            Self::Economy | Self::Inventory | Self::Friends => Duration::from_secs(5 * 60),
            Self::Presence => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "users" | "user" => Ok(Self::Users),
            "games" | "game" => Ok(Self::Games),
            "groups" | "group" => Ok(Self::Groups),
            "assets" | "asset" => Ok(Self::Assets),
            "economy" => Ok(Self::Economy),
            "catalog" => Ok(Self::Catalog),
            "avatars" | "avatar" => Ok(Self::Avatars),
            "inventory" => Ok(Self::Inventory),
            "friends" => Ok(Self::Friends),
            "badges" | "badge" => Ok(Self::Badges),
            "presence" => Ok(Self::Presence),
            "thumbnails" | "thumbnail" => Ok(Self::Thumbnails),
            _ => Err(format!("Unknown resource category: {s}")),
        }
    }
}
