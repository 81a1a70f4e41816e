//! The ordered parser set.
//!
//! A parser is a `(regex, rule)` pair over one log line.  The dispatcher
//! asks the set for the first matching parser and hands the captures to the
//! rule's handler.  Order is fixed at construction with more specific
//! patterns ahead of more general ones; no line matches two rules in
//! practice, but first-match-wins makes that a guarantee rather than a
//! hope.
//!
//! All patterns anchor on the standard frame
//! `[<timestamp>][<chainID>]<category>: <body>`.  Capture groups are
//! positional; group 1 is always the raw timestamp and group 2 the chain
//! ID (spaces included — handlers trim it).

use regex::{Captures, Regex};
use std::sync::LazyLock;

pub mod handlers;

pub use handlers::{HandlerCtx, HandlerError};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Which handler a matched line is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRule {
    AdminBroadcast,
    DeployableDamaged,
    PlayerConnected,
    PlayerPossess,
    PlayerDamaged,
    PlayerWounded,
    PlayerDied,
    PlayerRevived,
    JoinSucceeded,
    PlayerDisconnected,
    TickRate,
    RoundTickets,
    MatchWinner,
    RoundStateChange,
    WorldBringing,
}

struct Parser {
    rule: LineRule,
    regex: Regex,
}

/// The ordered set.  Build once per dispatcher; matching is read-only.
pub struct ParserSet {
    parsers: Vec<Parser>,
}

impl ParserSet {
    /// The full Squad log grammar.
    pub fn standard() -> Self {
        let table: &[(LineRule, &str)] = &[
            (
                LineRule::AdminBroadcast,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquad: ADMIN COMMAND: Message broadcasted <(.+)> from (.+)",
            ),
            (
                LineRule::DeployableDamaged,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquadTrace: \[DedicatedServer\](?:ASQDeployable::)?TakeDamage\(\): ([A-Za-z0-9_]+)_C_[0-9]+: ([0-9.]+) damage attempt by causer ([A-Za-z0-9_]+)_C_[0-9]+ instigator (.+) with damage type ([A-Za-z0-9_]+)_C health remaining ([0-9.]+)",
            ),
            (
                LineRule::PlayerConnected,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquad: PostLogin: NewPlayer: BP_PlayerController_C .+PersistentLevel\.([^ ]+) \(IP: ([0-9.]+) \| Online IDs:([^)]*)\)",
            ),
            (
                LineRule::PlayerPossess,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquadTrace: \[DedicatedServer\](?:ASQPlayerController::)?OnPossess\(\): PC=(.+) \(Online IDs:([^)]*)\) Pawn=([A-Za-z0-9_]+)_C",
            ),
            (
                LineRule::PlayerDamaged,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquad: Player:(.+) ActualDamage=([0-9.]+) from (.+) \(Online IDs:([^|]*)\| Player Controller ID: ([^ )]+)\) ?caused by ([A-Za-z0-9_-]+)_C",
            ),
            (
                LineRule::PlayerWounded,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquadTrace: \[DedicatedServer\](?:ASQSoldier::)?Wound\(\): Player:(.+) KillingDamage=(?:-)?([0-9.]+) from ([^ ]+) \(Online IDs:([^|]*)\| Contoller ID: ([A-Za-z0-9_]+)\) caused by ([A-Za-z0-9_-]+)_C",
            ),
            (
                LineRule::PlayerDied,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquadTrace: \[DedicatedServer\](?:ASQSoldier::)?Die\(\): Player:(.+) KillingDamage=(?:-)?([0-9.]+) from ([^ ]+) \(Online IDs:([^|]*)\| Contoller ID: ([A-Za-z0-9_]+)\) caused by ([A-Za-z0-9_-]+)_C",
            ),
            (
                LineRule::PlayerRevived,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquad: (.+) \(Online IDs:([^)]*)\) has revived (.+) \(Online IDs:([^)]*)\)\.",
            ),
            (
                LineRule::JoinSucceeded,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogNet: Join succeeded: (.+)",
            ),
            (
                LineRule::PlayerDisconnected,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogNet: UChannel::Close: Sending CloseBunch\. ChIndex == [0-9]+\. Name: \[UChannel\] ChIndex: [0-9]+, Closing: [0-9]+ \[UNetConnection\] RemoteAddr: ([0-9.]+):[0-9]+, Name: (?:Steam|EOSIp)NetConnection_[0-9]+, Driver: GameNetDriver (?:Steam|EOS)NetDriver_[0-9]+, IsServer: YES, PC: ([^ ,]+), Owner: [^ ,]+, UniqueId: (?:RedpointEOS|Steam):([A-Za-z0-9]+)",
            ),
            (
                LineRule::TickRate,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquad: USQGameState: Server Tick Rate: ([0-9.]+)",
            ),
            (
                LineRule::RoundTickets,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquadGameEvents: Display: Team ([0-9]), (.+?) \( ?(.+?) ?\) has (won|lost) the match with ([0-9]+) Tickets on layer (.+?) \(level (.+?)\)!",
            ),
            (
                LineRule::MatchWinner,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogSquadTrace: \[DedicatedServer\]ASQGameMode::DetermineMatchWinner\(\): (.+) won on (.+)",
            ),
            (
                LineRule::RoundStateChange,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogGameState: Match State Changed from InProgress to WaitingPostMatch",
            ),
            (
                LineRule::WorldBringing,
                r"^\[([0-9.:-]+)\]\[([ 0-9]*)\]LogWorld: Bringing World /([A-Za-z0-9_]+)/(?:Maps/)?([A-Za-z0-9_-]+)/?(?:.+/)?([A-Za-z0-9_-]+)(?:\.[A-Za-z0-9_-]+)",
            ),
        ];
        ParserSet {
            parsers: table
                .iter()
                .map(|(rule, pattern)| Parser {
                    rule: *rule,
                    regex: Regex::new(pattern).expect("static pattern compiles"),
                })
                .collect(),
        }
    }

    /// First matching parser for `line`, if any.
    pub fn find_match<'l>(&self, line: &'l str) -> Option<(LineRule, Captures<'l>)> {
        self.parsers
            .iter()
            .find_map(|p| p.regex.captures(line).map(|caps| (p.rule, caps)))
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Capture helpers
// ---------------------------------------------------------------------------

/// A positional group as `&str`, empty when absent.
pub(crate) fn group<'t>(caps: &Captures<'t>, index: usize) -> &'t str {
    caps.get(index).map_or("", |m| m.as_str())
}

static EOS_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EOS: ([^\s|)]+)").expect("static pattern compiles"));
static STEAM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"steam: ([^\s|)]+)").expect("static pattern compiles"));

/// Parse an `Online IDs:` segment into `(eos, steam)`; either may be empty.
pub(crate) fn parse_online_ids(segment: &str) -> (String, String) {
    let eos = EOS_ID
        .captures(segment)
        .map_or(String::new(), |c| c[1].to_owned());
    let steam = STEAM_ID
        .captures(segment)
        .map_or(String::new(), |c| c[1].to_owned());
    (eos, steam)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_for(line: &str) -> Option<LineRule> {
        ParserSet::standard().find_match(line).map(|(rule, _)| rule)
    }

    #[test]
    fn post_login_line_matches_and_captures() {
        let set = ParserSet::standard();
        let line = "[2026.07.14-20.11.02:103][ 5]LogSquad: PostLogin: NewPlayer: BP_PlayerController_C /Game/Maps/Narva/Narva_AAS_v2.Narva_AAS_v2:PersistentLevel.PC42 (IP: 10.0.0.7 | Online IDs: EOS: E1 steam: S1)";
        let (rule, caps) = set.find_match(line).unwrap();
        assert_eq!(rule, LineRule::PlayerConnected);
        assert_eq!(group(&caps, 1), "2026.07.14-20.11.02:103");
        assert_eq!(group(&caps, 2), " 5");
        assert_eq!(group(&caps, 3), "PC42");
        assert_eq!(group(&caps, 4), "10.0.0.7");
        let (eos, steam) = parse_online_ids(group(&caps, 5));
        assert_eq!(eos, "E1");
        assert_eq!(steam, "S1");
    }

    #[test]
    fn die_line_matches_and_captures() {
        let set = ParserSet::standard();
        let line = "[t3][ 9]LogSquadTrace: [DedicatedServer]ASQSoldier::Die(): Player:Alpha KillingDamage=100 from BP_Soldier (Online IDs: EOS: E2 steam: S2 | Contoller ID: PC7) caused by BP_Rifle_C";
        let (rule, caps) = set.find_match(line).unwrap();
        assert_eq!(rule, LineRule::PlayerDied);
        assert_eq!(group(&caps, 3), "Alpha");
        assert_eq!(group(&caps, 4), "100");
        assert_eq!(group(&caps, 5), "BP_Soldier");
        assert_eq!(group(&caps, 7), "PC7");
        assert_eq!(group(&caps, 8), "BP_Rifle");
        let (eos, steam) = parse_online_ids(group(&caps, 6));
        assert_eq!(eos, "E2");
        assert_eq!(steam, "S2");
    }

    #[test]
    fn damaged_line_matches_without_space_before_caused() {
        let line = "[t][12]LogSquad: Player:Bravo ActualDamage=32.5 from Alpha (Online IDs: EOS: E1 steam: S1 | Player Controller ID: BP_PlayerController_C_2146085496)caused by BP_SVD_Rifle_C";
        assert_eq!(rule_for(line), Some(LineRule::PlayerDamaged));
    }

    #[test]
    fn tickets_line_matches_and_captures() {
        let set = ParserSet::standard();
        let line = "[ta][ 1]LogSquadGameEvents: Display: Team 1, USA (USA) has won the match with 300 Tickets on layer L (level M)!";
        let (rule, caps) = set.find_match(line).unwrap();
        assert_eq!(rule, LineRule::RoundTickets);
        assert_eq!(group(&caps, 3), "1");
        assert_eq!(group(&caps, 4), "USA");
        assert_eq!(group(&caps, 5), "USA");
        assert_eq!(group(&caps, 6), "won");
        assert_eq!(group(&caps, 7), "300");
        assert_eq!(group(&caps, 8), "L");
        assert_eq!(group(&caps, 9), "M");
    }

    #[test]
    fn bringing_world_splits_dlc_map_and_layer() {
        let set = ParserSet::standard();
        let line = "[td][ 4]LogWorld: Bringing World /Game/Maps/Next/Next_Main.Next_Main";
        let (rule, caps) = set.find_match(line).unwrap();
        assert_eq!(rule, LineRule::WorldBringing);
        assert_eq!(group(&caps, 3), "Game");
        assert_eq!(group(&caps, 4), "Next");
        assert_eq!(group(&caps, 5), "Next_Main");
    }

    #[test]
    fn close_bunch_line_matches_for_both_id_spaces() {
        let eos = "[t][101]LogNet: UChannel::Close: Sending CloseBunch. ChIndex == 2. Name: [UChannel] ChIndex: 2, Closing: 0 [UNetConnection] RemoteAddr: 10.0.0.7:7777, Name: EOSIpNetConnection_2147312332, Driver: GameNetDriver EOSNetDriver_2147482716, IsServer: YES, PC: BP_PlayerController_C_2147254372, Owner: BP_PlayerController_C_2147254372, UniqueId: RedpointEOS:E1";
        assert_eq!(rule_for(eos), Some(LineRule::PlayerDisconnected));
        let steam = "[t][101]LogNet: UChannel::Close: Sending CloseBunch. ChIndex == 2. Name: [UChannel] ChIndex: 2, Closing: 0 [UNetConnection] RemoteAddr: 10.0.0.7:7777, Name: SteamNetConnection_2147312332, Driver: GameNetDriver SteamNetDriver_2147482716, IsServer: YES, PC: BP_PlayerController_C_2147254372, Owner: BP_PlayerController_C_2147254372, UniqueId: Steam:76561198000000001";
        assert_eq!(rule_for(steam), Some(LineRule::PlayerDisconnected));
    }

    #[test]
    fn remaining_rules_match_their_lines() {
        let cases = [
            (
                "[t][ 3]LogSquad: ADMIN COMMAND: Message broadcasted <Be nice> from RCON",
                LineRule::AdminBroadcast,
            ),
            (
                "[t][ 8]LogSquadTrace: [DedicatedServer]ASQDeployable::TakeDamage(): BP_FOBRadio_Woodland_C_2146067116: 350.00 damage attempt by causer BP_Mortarround4_C_2146062411 instigator Charlie with damage type BP_Fragmentation_DamageType_C health remaining 137.90",
                LineRule::DeployableDamaged,
            ),
            (
                "[t][ 6]LogSquadTrace: [DedicatedServer]ASQPlayerController::OnPossess(): PC=Alpha (Online IDs: EOS: E1 steam: S1) Pawn=BP_Soldier_RU_Medic_C",
                LineRule::PlayerPossess,
            ),
            (
                "[t][ 9]LogSquadTrace: [DedicatedServer]ASQSoldier::Wound(): Player:Alpha KillingDamage=-300.0 from BP_Soldier (Online IDs: EOS: E2 steam: S2 | Contoller ID: PC7) caused by BP_Rifle_C",
                LineRule::PlayerWounded,
            ),
            (
                "[t][11]LogSquad: Bravo (Online IDs: EOS: E2 steam: S2) has revived Alpha (Online IDs: EOS: E1 steam: S1).",
                LineRule::PlayerRevived,
            ),
            (
                "[t2][ 5]LogNet: Join succeeded: Alpha",
                LineRule::JoinSucceeded,
            ),
            (
                "[t][ 2]LogSquad: USQGameState: Server Tick Rate: 48.25",
                LineRule::TickRate,
            ),
            (
                "[tb][ 2]LogSquadTrace: [DedicatedServer]ASQGameMode::DetermineMatchWinner(): USA won on L",
                LineRule::MatchWinner,
            ),
            (
                "[tc][ 3]LogGameState: Match State Changed from InProgress to WaitingPostMatch",
                LineRule::RoundStateChange,
            ),
        ];
        for (line, expected) in cases {
            assert_eq!(rule_for(line), Some(expected), "line: {line}");
        }
    }

    #[test]
    fn unmatched_lines_produce_no_rule() {
        assert_eq!(rule_for(""), None);
        assert_eq!(rule_for("[t][ 1]LogSquad: something unrecognised"), None);
        assert_eq!(
            rule_for("[t][ 1]LogGameState: Match State Changed from WaitingToStart to InProgress"),
            None
        );
    }

    #[test]
    fn online_ids_parse_tolerates_missing_pieces() {
        assert_eq!(
            parse_online_ids(" EOS: abc steam: 765"),
            ("abc".to_owned(), "765".to_owned())
        );
        assert_eq!(parse_online_ids(" EOS: abc"), ("abc".to_owned(), String::new()));
        assert_eq!(parse_online_ids(""), (String::new(), String::new()));
    }
}
