//! Canned Squad log lines.
//!
//! One fixed timestamp is fine for correlation tests; the pipeline treats
//! it as an opaque string.

const TS: &str = "2026.07.14-20.11.02:103";

pub fn post_login(chain: u32, controller: &str, ip: &str, eos: &str, steam: &str) -> String {
    format!(
        "[{TS}][ {chain}]LogSquad: PostLogin: NewPlayer: BP_PlayerController_C \
         /Game/Maps/Narva/Narva_AAS_v2.Narva_AAS_v2:PersistentLevel.{controller} \
         (IP: {ip} | Online IDs: EOS: {eos} steam: {steam})"
    )
}

pub fn join_succeeded(chain: u32, suffix: &str) -> String {
    format!("[{TS}][ {chain}]LogNet: Join succeeded: {suffix}")
}

pub fn possess(chain: u32, suffix: &str, eos: &str, steam: &str, pawn: &str) -> String {
    format!(
        "[{TS}][ {chain}]LogSquadTrace: [DedicatedServer]ASQPlayerController::OnPossess(): \
         PC={suffix} (Online IDs: EOS: {eos} steam: {steam}) Pawn={pawn}_C"
    )
}

pub fn die(chain: u32, victim: &str, attacker_eos: &str, attacker_steam: &str, controller: &str) -> String {
    format!(
        "[{TS}][ {chain}]LogSquadTrace: [DedicatedServer]ASQSoldier::Die(): Player:{victim} \
         KillingDamage=100.0 from BP_Soldier (Online IDs: EOS: {attacker_eos} steam: {attacker_steam} \
         | Contoller ID: {controller}) caused by BP_Rifle_C"
    )
}

pub fn tick_rate(chain: u32, rate: &str) -> String {
    format!("[{TS}][ {chain}]LogSquad: USQGameState: Server Tick Rate: {rate}")
}

pub fn tickets(chain: u32, team: u8, faction: &str, action: &str, tickets: u32, layer: &str, level: &str) -> String {
    format!(
        "[{TS}][ {chain}]LogSquadGameEvents: Display: Team {team}, {faction} ({faction}) has \
         {action} the match with {tickets} Tickets on layer {layer} (level {level})!"
    )
}

pub fn match_winner(chain: u32, winner: &str, layer: &str) -> String {
    format!(
        "[{TS}][ {chain}]LogSquadTrace: [DedicatedServer]ASQGameMode::DetermineMatchWinner(): \
         {winner} won on {layer}"
    )
}

pub fn post_match(chain: u32) -> String {
    format!("[{TS}][ {chain}]LogGameState: Match State Changed from InProgress to WaitingPostMatch")
}

pub fn bringing_world(chain: u32, map: &str, layer: &str) -> String {
    format!("[{TS}][ {chain}]LogWorld: Bringing World /Game/Maps/{map}/{layer}.{layer}")
}
