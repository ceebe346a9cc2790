//! Lua scripts executed server-side so every multi-step cache operation
//! (check, then mutate) runs atomically, with no window for a second caller
//! to observe or clobber the intermediate state.

/// KEYS[1] = slot prefix (`slot:account:{id}:` or `slot:user:{id}:`)
/// ARGV[1] = requestID, ARGV[2] = max, ARGV[3] = ttl seconds
/// Returns 1 on acquire, 0 if at capacity.
pub const ACQUIRE_SLOT: &str = r#"
local prefix = KEYS[1]
local request_id = ARGV[1]
local max = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local slot_key = prefix .. request_id

if redis.call("EXISTS", slot_key) == 1 then
    redis.call("EXPIRE", slot_key, ttl)
    return 1
end

local count = 0
local cursor = "0"
repeat
    local scan = redis.call("SCAN", cursor, "MATCH", prefix .. "*", "COUNT", 100)
    cursor = scan[1]
    count = count + #scan[2]
until cursor == "0"

if count < max then
    redis.call("SET", slot_key, "1", "EX", ttl)
    return 1
end
return 0
"#;

/// KEYS[1] = slot key to release. Returns number of keys deleted (0 or 1).
pub const RELEASE_SLOT: &str = r#"
return redis.call("DEL", KEYS[1])
"#;

/// KEYS[1] = sorted set key. ARGV[1] = member (session uuid), ARGV[2] = max,
/// ARGV[3] = idle_timeout_seconds. Uses server TIME for a consistent clock
/// across replicas. Returns 1 on success, 0 if at capacity.
pub const REGISTER_SESSION: &str = r#"
local key = KEYS[1]
local member = ARGV[1]
local max = tonumber(ARGV[2])
local idle_timeout = tonumber(ARGV[3])

local time = redis.call("TIME")
local now = tonumber(time[1])

redis.call("ZREMRANGEBYSCORE", key, "-inf", now - idle_timeout)

if redis.call("ZSCORE", key, member) then
    redis.call("ZADD", key, now, member)
    return 1
end

local card = redis.call("ZCARD", key)
if card < max then
    redis.call("ZADD", key, now, member)
    return 1
end
return 0
"#;

/// KEYS[1] = sorted set key. ARGV[1] = idle_timeout_seconds.
/// Returns the evict-then-card active session count.
pub const ACTIVE_SESSION_COUNT: &str = r#"
local key = KEYS[1]
local idle_timeout = tonumber(ARGV[1])
local time = redis.call("TIME")
local now = tonumber(time[1])
redis.call("ZREMRANGEBYSCORE", key, "-inf", now - idle_timeout)
return redis.call("ZCARD", key)
"#;

/// KEYS[1] = balance key. ARGV[1] = amount to deduct.
/// Returns 1 on success, 0 if insufficient balance (fails closed, no negative balance).
pub const DEDUCT_BALANCE: &str = r#"
local key = KEYS[1]
local amount = tonumber(ARGV[1])
local current = tonumber(redis.call("GET", key) or "0")
if current < amount then
    return 0
end
redis.call("INCRBYFLOAT", key, -amount)
return 1
"#;

/// KEYS[1] = usage key (HINCRBYFLOAT target hash), ARGV[1] = field, ARGV[2] = amount.
pub const INCREMENT_USAGE: &str = r#"
return redis.call("HINCRBYFLOAT", KEYS[1], ARGV[1], ARGV[2])
"#;
