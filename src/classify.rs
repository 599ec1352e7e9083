// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Heuristic classification of captured exchanges as game traffic.

use hyper::HeaderMap;

/// Keywords whose presence in a URL or body marks an exchange as game-related.
const GAME_KEYWORDS: &[&str] = &[
    "game",
    "player",
    "match",
    "leaderboard",
    "shop",
    "item",
    "character",
    "level",
    "achievement",
    "inventory",
    "quest",
    "battle",
    "arena",
    "pvp",
    "guild",
    "clan",
    "unity",
    "unreal",
];

/// Decide whether an exchange looks like game traffic.
///
/// Performs a case-insensitive substring search of [`GAME_KEYWORDS`] against
/// the URL and body text, short-circuiting on the first hit. Independently of
/// the keyword set, a `User-Agent` containing `unity` or `unreal` (the two
/// dominant engine network stacks) also classifies as game traffic.
pub fn is_game_traffic(url: &str, headers: &HeaderMap, body_text: &str) -> bool {
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if user_agent.contains("unity") || user_agent.contains("unreal") {
        return true;
    }

    let url_lower = url.to_ascii_lowercase();
    let body_lower = body_text.to_ascii_lowercase();
    GAME_KEYWORDS
        .iter()
        .any(|kw| url_lower.contains(kw) || body_lower.contains(kw))
}
