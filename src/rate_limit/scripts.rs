// Window algorithm scripts
//
// KEYS[1] is the rate key, ARGV[1] the limit and ARGV[2] the window in
// milliseconds (0 for no expiry). Replies {allowed, pttl}; pttl is only set
// on denial.

use crate::rate_limit::window::Algorithm;
use once_cell::sync::Lazy;

const FIXED_WINDOW_SOURCE: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local expire_ms = tonumber(ARGV[2])

local current = tonumber(redis.call('GET', key) or '0')

if current == 0 then
    if expire_ms > 0 then
        redis.call('SET', key, 1, 'PX', expire_ms)
    else
        redis.call('SET', key, 1)
    end
    return {1, 0}
end

if current + 1 > limit then
    return {0, redis.call('PTTL', key)}
end

redis.call('INCR', key)
return {1, 0}
"#;

const SLIDING_WINDOW_SOURCE: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local expire_ms = tonumber(ARGV[2])

-- Required before TIME on Redis < 5
redis.replicate_commands()

local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

if expire_ms > 0 then
    redis.call('ZREMRANGEBYSCORE', key, '-inf', now_ms - expire_ms)
end

local current = redis.call('ZCARD', key)

if current >= limit then
    return {0, redis.call('PTTL', key)}
end

-- Members must be unique even when two requests share a microsecond
redis.call('ZADD', key, now_ms, time[1] .. '.' .. time[2] .. '-' .. current)

if expire_ms > 0 then
    redis.call('PEXPIRE', key, expire_ms)
end

return {1, 0}
"#;

/// A window script together with its content hash
#[derive(Debug)]
pub struct WindowScript {
    algorithm: Algorithm,
    source: &'static str,
    hash: String,
}

static FIXED_WINDOW: Lazy<WindowScript> =
    Lazy::new(|| WindowScript::new(Algorithm::FixedWindow, FIXED_WINDOW_SOURCE));

static SLIDING_WINDOW: Lazy<WindowScript> =
    Lazy::new(|| WindowScript::new(Algorithm::SlidingWindow, SLIDING_WINDOW_SOURCE));

impl WindowScript {
    fn new(algorithm: Algorithm, source: &'static str) -> Self {
        // Same SHA1 the server assigns on SCRIPT LOAD
        let hash = redis::Script::new(source).get_hash().to_string();
        Self {
            algorithm,
            source,
            hash,
        }
    }

    pub fn for_algorithm(algorithm: Algorithm) -> &'static WindowScript {
        match algorithm {
            Algorithm::FixedWindow => &FIXED_WINDOW,
            Algorithm::SlidingWindow => &SLIDING_WINDOW,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}
