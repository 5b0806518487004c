//! Payload layouts shared by nodes and the orchestrator.
//!
//! Records travel as three pairs each: `(key, value)`, `("owner", owner)`,
//! `("delTime", expiry or absent)`. Orchestrator commands carry ring entries
//! as `name address port` lines and rings in their text form.

use ringkv_proto::{format_timestamp, parse_timestamp, KeyValue, Message, Source, StatusType};
use ringkv_ring::{HashRing, RingEntry, RingError};
use ringkv_storage::PartitionRecord;

pub const OWNER_KEY: &str = "owner";
pub const EXPIRY_KEY: &str = "delTime";
pub const SOURCE_KEY: &str = "source";
pub const META_KEY: &str = "meta";
pub const TARGET_KEY: &str = "target";
pub const CACHE_SIZE_KEY: &str = "cacheSize";
pub const STRATEGY_KEY: &str = "strategy";
pub const FROM_KEY: &str = "from";
pub const TO_KEY: &str = "to";

const PAIRS_PER_RECORD: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("record list of {0} pairs is not a multiple of three")]
    Ragged(usize),
    #[error("record {key:?}: {reason}")]
    BadRecord { key: String, reason: String },
    #[error("missing field {0:?}")]
    Missing(&'static str),
    #[error("bad field {field:?}: {reason}")]
    BadField { field: &'static str, reason: String },
    #[error(transparent)]
    Ring(#[from] RingError),
}

// ── Records ──

pub fn records_to_pairs(records: &[PartitionRecord]) -> Vec<KeyValue> {
    let mut pairs = Vec::with_capacity(records.len() * PAIRS_PER_RECORD);
    for r in records {
        pairs.push(KeyValue::some(r.key.clone(), r.value.clone()));
        pairs.push(KeyValue::some(OWNER_KEY, r.owner.clone()));
        pairs.push(KeyValue::new(
            EXPIRY_KEY,
            r.expires_at.as_ref().map(format_timestamp),
        ));
    }
    pairs
}

pub fn pairs_to_records(pairs: &[KeyValue]) -> Result<Vec<PartitionRecord>, ConvertError> {
    if pairs.len() % PAIRS_PER_RECORD != 0 {
        return Err(ConvertError::Ragged(pairs.len()));
    }
    pairs
        .chunks_exact(PAIRS_PER_RECORD)
        .map(|chunk| {
            let key = chunk[0].key.clone();
            let bad = |reason: &str| ConvertError::BadRecord {
                key: key.clone(),
                reason: reason.to_string(),
            };
            let value = chunk[0].value.clone().ok_or_else(|| bad("value is absent"))?;
            if chunk[1].key != OWNER_KEY {
                return Err(bad("second pair is not the owner"));
            }
            let owner = chunk[1].value.clone().ok_or_else(|| bad("owner is absent"))?;
            if chunk[2].key != EXPIRY_KEY {
                return Err(bad("third pair is not the expiry"));
            }
            let expires_at = match chunk[2].value_str() {
                None => None,
                Some(s) => Some(parse_timestamp(s).ok_or_else(|| bad("unparseable expiry"))?),
            };
            Ok(PartitionRecord {
                key: key.clone(),
                value,
                owner,
                expires_at,
            })
        })
        .collect()
}

// ── Peer requests ──

pub fn move_data_request(records: &[PartitionRecord]) -> Message {
    let mut msg = Message::new(Source::Server, StatusType::MoveData);
    msg.pairs = records_to_pairs(records);
    msg
}

pub fn replicate_request(source: &RingEntry, records: &[PartitionRecord]) -> Message {
    let mut msg = Message::new(Source::Server, StatusType::Replicate).with(SOURCE_KEY, source.to_line());
    msg.pairs.extend(records_to_pairs(records));
    msg
}

/// Split a REPLICATE frame into its sender and records.
pub fn parse_replicate(msg: &Message) -> Result<(RingEntry, Vec<PartitionRecord>), ConvertError> {
    let first = msg.first().ok_or(ConvertError::Missing(SOURCE_KEY))?;
    if first.key != SOURCE_KEY {
        return Err(ConvertError::Missing(SOURCE_KEY));
    }
    let line = first.value_str().ok_or(ConvertError::Missing(SOURCE_KEY))?;
    let source = RingEntry::parse_line(line)?;
    let records = pairs_to_records(&msg.pairs[1..])?;
    Ok((source, records))
}

pub fn add_user_request(username: &str, password: &str) -> Message {
    Message::new(Source::Server, StatusType::AddUser).with(username, password)
}

pub fn dead_server_report(dead: &RingEntry) -> Message {
    Message::text(Source::Server, StatusType::DeadServer, dead.to_line())
}

/// Entry carried by a DEAD_SERVER report.
pub fn parse_dead_server(msg: &Message) -> Result<RingEntry, ConvertError> {
    let line = msg
        .first()
        .and_then(KeyValue::value_str)
        .ok_or(ConvertError::Missing("entry"))?;
    Ok(RingEntry::parse_line(line)?)
}

// ── Orchestrator commands ──

/// Arguments of an INIT command.
#[derive(Debug, Clone)]
pub struct InitCommand {
    pub target: RingEntry,
    pub ring: HashRing,
    pub cache_size: usize,
    pub strategy: String,
}

pub fn init_request(target: &RingEntry, ring: &HashRing, cache_size: usize, strategy: &str) -> Message {
    Message::new(Source::Ecs, StatusType::Init)
        .with(TARGET_KEY, target.to_line())
        .with(META_KEY, ring.to_text())
        .with(CACHE_SIZE_KEY, cache_size.to_string())
        .with(STRATEGY_KEY, strategy)
}

fn required<'a>(msg: &'a Message, field: &'static str) -> Result<&'a str, ConvertError> {
    msg.value_of(field).ok_or(ConvertError::Missing(field))
}

pub fn parse_init(msg: &Message) -> Result<InitCommand, ConvertError> {
    let target = RingEntry::parse_line(required(msg, TARGET_KEY)?)?;
    let ring = HashRing::from_text(required(msg, META_KEY)?)?;
    let cache_size = required(msg, CACHE_SIZE_KEY)?
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| ConvertError::BadField {
            field: CACHE_SIZE_KEY,
            reason: e.to_string(),
        })?;
    let strategy = required(msg, STRATEGY_KEY)?.to_string();
    Ok(InitCommand {
        target,
        ring,
        cache_size,
        strategy,
    })
}

pub fn move_data_command(from: &RingEntry, to: &RingEntry) -> Message {
    Message::new(Source::Ecs, StatusType::MoveData)
        .with(FROM_KEY, from.to_line())
        .with(TO_KEY, to.to_line())
}

pub fn parse_move_data_command(msg: &Message) -> Result<(RingEntry, RingEntry), ConvertError> {
    let from = RingEntry::parse_line(required(msg, FROM_KEY)?)?;
    let to = RingEntry::parse_line(required(msg, TO_KEY)?)?;
    Ok((from, to))
}

pub fn update_command(ring: &HashRing) -> Message {
    Message::text(Source::Ecs, StatusType::Update, ring.to_text())
}

pub fn parse_update(msg: &Message) -> Result<HashRing, ConvertError> {
    let text = msg
        .first()
        .and_then(KeyValue::value_str)
        .ok_or(ConvertError::Missing("ring"))?;
    Ok(HashRing::from_text(text)?)
}

/// A bare command frame (START, STOP, LOCK_WRITE, ...).
pub fn ecs_command(status: StatusType) -> Message {
    Message::empty(Source::Ecs, status)
}
