// src/core/commands/table.rs

//! Static command metadata: arity bounds, routing class, and the deny list.
//!
//! The proxy does not interpret command semantics beyond this table; a
//! command that passes inspection is forwarded to the owning shard verbatim.

use crate::core::CitrineError;
use crate::core::protocol::RespFrame;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// How the dispatcher treats a command after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Single-key command, forwarded to the shard owning its routing key.
    Ordinary,
    /// MGET: split into per-key GETs, reassembled into an array reply.
    MultiGet,
    /// MSET: split into per-pair SETs, reassembled into `+OK`.
    MultiSet,
    /// DEL: split into per-key DELs, replies summed into an integer.
    MultiDel,
    /// Answered by the proxy itself; never reaches a backend.
    ProxyLocal,
}

/// Arity bounds and class for one command. Bounds count the full array
/// length (command name included); `-1` leaves that side unbounded.
#[derive(Debug, Clone, Copy)]
pub struct CommandRule {
    pub min_args: i32,
    pub max_args: i32,
    pub class: CommandClass,
}

const fn rule(min_args: i32, max_args: i32, class: CommandClass) -> CommandRule {
    CommandRule {
        min_args,
        max_args,
        class,
    }
}

/// Commands the proxy refuses outright: administrative, blocking, pub/sub,
/// cross-key set algebra, transactions, scans, and topology mutators.
static FORBIDDEN: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "BGREWRITEAOF",
        "BGSAVE",
        "BITOP",
        "BLPOP",
        "BRPOP",
        "BRPOPLPUSH",
        "CLIENT",
        "CLUSTER",
        "CONFIG",
        "DBSIZE",
        "DEBUG",
        "DISCARD",
        "EXEC",
        "FLUSHALL",
        "FLUSHDB",
        "KEYS",
        "LASTSAVE",
        "MONITOR",
        "MOVE",
        "MSETNX",
        "MULTI",
        "OBJECT",
        "PSUBSCRIBE",
        "PUBLISH",
        "PUNSUBSCRIBE",
        "RANDOMKEY",
        "RENAME",
        "RENAMENX",
        "SAVE",
        "SCAN",
        "SSCAN",
        "HSCAN",
        "ZSCAN",
        "SCRIPT",
        "SHUTDOWN",
        "SLAVEOF",
        "SLOWLOG",
        "SORT",
        "SUBSCRIBE",
        "SYNC",
        "SDIFF",
        "SDIFFSTORE",
        "SINTER",
        "SINTERSTORE",
        "SMOVE",
        "SUNION",
        "SUNIONSTORE",
        "TIME",
        "UNSUBSCRIBE",
        "UNWATCH",
        "WATCH",
        "ZUNIONSTORE",
        "ZINTERSTORE",
    ]
    .into_iter()
    .collect()
});

/// Commands safe to serve from a replica when `prefer_replica` is on.
/// Multi-key commands are absent: their fan-out sub-requests always go to
/// the primary.
static READONLY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "GET",
        "GETRANGE",
        "STRLEN",
        "EXISTS",
        "TYPE",
        "TTL",
        "PTTL",
        "DUMP",
        "BITCOUNT",
        "GETBIT",
        "HGET",
        "HMGET",
        "HGETALL",
        "HLEN",
        "HEXISTS",
        "HKEYS",
        "HVALS",
        "SCARD",
        "SISMEMBER",
        "SMEMBERS",
        "SRANDMEMBER",
        "LINDEX",
        "LRANGE",
        "LLEN",
        "ZCARD",
        "ZCOUNT",
        "ZRANK",
        "ZREVRANK",
        "ZRANGE",
        "ZREVRANGE",
        "ZRANGEBYSCORE",
        "ZREVRANGEBYSCORE",
        "ZSCORE",
        "ZRANGEBYLEX",
        "ZLEXCOUNT",
    ]
    .into_iter()
    .collect()
});

/// True when a command only reads and may be routed to a replica.
pub fn is_readonly(name: &str) -> bool {
    READONLY.contains(name)
}

static RULES: Lazy<HashMap<&'static str, CommandRule>> = Lazy::new(|| {
    use CommandClass::*;
    HashMap::from([
        // proxy-local
        ("PING", rule(1, 1, ProxyLocal)),
        ("QUIT", rule(1, 1, ProxyLocal)),
        ("SELECT", rule(2, 2, ProxyLocal)),
        ("INFO", rule(1, 1, ProxyLocal)),
        // multi-key
        ("MGET", rule(2, 2001, MultiGet)),
        ("MSET", rule(3, 4001, MultiSet)),
        ("DEL", rule(2, 2001, MultiDel)),
        // key
        ("TYPE", rule(2, 2, Ordinary)),
        ("EXISTS", rule(2, 2, Ordinary)),
        ("EXPIRE", rule(3, 3, Ordinary)),
        ("EXPIREAT", rule(3, 3, Ordinary)),
        ("TTL", rule(2, 2, Ordinary)),
        ("PTTL", rule(2, 2, Ordinary)),
        ("PERSIST", rule(2, 2, Ordinary)),
        ("PEXPIRE", rule(3, 3, Ordinary)),
        ("PEXPIREAT", rule(3, 3, Ordinary)),
        ("DUMP", rule(2, 2, Ordinary)),
        ("RESTORE", rule(4, 4, Ordinary)),
        // bit
        ("SETBIT", rule(4, 4, Ordinary)),
        ("BITCOUNT", rule(2, 2, Ordinary)),
        ("GETBIT", rule(3, 3, Ordinary)),
        // string
        ("GET", rule(2, 2, Ordinary)),
        ("GETRANGE", rule(4, 4, Ordinary)),
        ("GETSET", rule(3, 3, Ordinary)),
        ("SET", rule(3, 6, Ordinary)),
        ("SETEX", rule(4, 4, Ordinary)),
        ("SETNX", rule(3, 3, Ordinary)),
        ("PSETEX", rule(4, 4, Ordinary)),
        ("SETRANGE", rule(4, 4, Ordinary)),
        ("STRLEN", rule(2, 2, Ordinary)),
        ("INCR", rule(2, 2, Ordinary)),
        ("DECR", rule(2, 2, Ordinary)),
        ("INCRBY", rule(3, 3, Ordinary)),
        ("DECRBY", rule(3, 3, Ordinary)),
        ("INCRBYFLOAT", rule(3, 3, Ordinary)),
        ("APPEND", rule(3, 3, Ordinary)),
        // hash
        ("HGET", rule(3, 3, Ordinary)),
        ("HSET", rule(4, 4, Ordinary)),
        ("HMGET", rule(3, -1, Ordinary)),
        ("HMSET", rule(4, -1, Ordinary)),
        ("HGETALL", rule(2, 2, Ordinary)),
        ("HLEN", rule(2, 2, Ordinary)),
        ("HDEL", rule(3, -1, Ordinary)),
        ("HEXISTS", rule(3, 3, Ordinary)),
        ("HINCRBY", rule(4, 4, Ordinary)),
        ("HINCRBYFLOAT", rule(4, 4, Ordinary)),
        ("HKEYS", rule(2, 2, Ordinary)),
        ("HSETNX", rule(4, 4, Ordinary)),
        ("HVALS", rule(2, 2, Ordinary)),
        // set
        ("SADD", rule(3, -1, Ordinary)),
        ("SCARD", rule(2, 2, Ordinary)),
        ("SISMEMBER", rule(3, 3, Ordinary)),
        ("SMEMBERS", rule(2, 2, Ordinary)),
        ("SREM", rule(3, -1, Ordinary)),
        ("SPOP", rule(2, 2, Ordinary)),
        ("SRANDMEMBER", rule(2, 3, Ordinary)),
        // list
        ("LPUSH", rule(3, -1, Ordinary)),
        ("RPUSH", rule(3, -1, Ordinary)),
        ("LPOP", rule(2, 2, Ordinary)),
        ("RPOP", rule(2, 2, Ordinary)),
        ("LINDEX", rule(3, 3, Ordinary)),
        ("LINSERT", rule(5, 5, Ordinary)),
        ("LTRIM", rule(4, 4, Ordinary)),
        ("LRANGE", rule(4, 4, Ordinary)),
        ("LLEN", rule(2, 2, Ordinary)),
        ("LPUSHX", rule(3, 3, Ordinary)),
        ("RPUSHX", rule(3, 3, Ordinary)),
        ("LSET", rule(4, 4, Ordinary)),
        ("LREM", rule(4, 4, Ordinary)),
        // zset
        ("ZADD", rule(4, -1, Ordinary)),
        ("ZCARD", rule(2, 2, Ordinary)),
        ("ZCOUNT", rule(4, 4, Ordinary)),
        ("ZRANK", rule(3, 3, Ordinary)),
        ("ZREVRANK", rule(3, 3, Ordinary)),
        ("ZRANGE", rule(4, 5, Ordinary)),
        ("ZREVRANGE", rule(4, 5, Ordinary)),
        ("ZRANGEBYSCORE", rule(4, -1, Ordinary)),
        ("ZREVRANGEBYSCORE", rule(4, -1, Ordinary)),
        ("ZREM", rule(3, -1, Ordinary)),
        ("ZREMRANGEBYRANK", rule(4, 4, Ordinary)),
        ("ZREMRANGEBYSCORE", rule(4, 4, Ordinary)),
        ("ZINCRBY", rule(4, 4, Ordinary)),
        ("ZSCORE", rule(3, 3, Ordinary)),
        ("ZRANGEBYLEX", rule(4, 7, Ordinary)),
        ("ZLEXCOUNT", rule(4, 4, Ordinary)),
        ("ZREMRANGEBYLEX", rule(4, 4, Ordinary)),
    ])
});

/// Validates one decoded request against the table.
///
/// Returns the uppercased command name and its rule. The deny list wins over
/// everything else; unknown commands and arity violations are rejected
/// before any routing happens.
pub fn inspect(items: &[RespFrame]) -> Result<(String, CommandRule), CitrineError> {
    let Some(RespFrame::BulkString(first)) = items.first() else {
        return Err(CitrineError::ProtocolError(
            "empty or non-bulk command frame".to_string(),
        ));
    };

    let name = String::from_utf8_lossy(first).to_ascii_uppercase();

    if FORBIDDEN.contains(name.as_str()) {
        return Err(CitrineError::Forbidden(name));
    }

    let Some(rule) = RULES.get(name.as_str()) else {
        return Err(CitrineError::UnknownCommand(name));
    };

    let n = items.len() as i32;
    if (rule.min_args != -1 && n < rule.min_args) || (rule.max_args != -1 && n > rule.max_args) {
        return Err(CitrineError::WrongArgumentCount(name));
    }

    Ok((name, *rule))
}
