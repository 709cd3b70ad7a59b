//! Redis implementation of [`CacheStore`].
//!
//! Guarded mutations run as Lua scripts so each one is a single step on the
//! server. Whole-key rewrites go through `MULTI`/`EXEC` pipelines.

use std::time::Duration;

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};

use crate::cache::{CacheError, CacheStore, HeadSwap};

/// KEYS[1] list, ARGV[1] expected head, ARGV[2] high water, ARGV[3] low
/// water, ARGV[4..] replacement (head first).
const SWAP_HEAD_SCRIPT: &str = r#"
local head = redis.call('LINDEX', KEYS[1], 0)
if head ~= ARGV[1] then
  return 0
end
local ttl = redis.call('PTTL', KEYS[1])
if redis.call('LLEN', KEYS[1]) >= tonumber(ARGV[2]) then
  redis.call('LTRIM', KEYS[1], 0, tonumber(ARGV[3]) - 1)
end
redis.call('LPOP', KEYS[1])
for i = #ARGV, 4, -1 do
  redis.call('LPUSH', KEYS[1], ARGV[i])
end
if ttl > 0 then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
"#;

const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const ADD_IF_EXISTS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    swap_head: Script,
    delete_if_equals: Script,
    add_if_exists: Script,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::backend)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::backend(format!("failed to connect to Redis: {err}")))?;
        Ok(Self {
            conn,
            swap_head: Script::new(SWAP_HEAD_SCRIPT),
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
            add_if_exists: Script::new(ADD_IF_EXISTS_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn stop_index(stop: usize) -> isize {
    isize::try_from(stop).unwrap_or(isize::MAX)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn list_len(&self, key: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn();
        let len: usize = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(len)
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop_index(stop))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(values)
    }

    async fn list_replace(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !values.is_empty() {
            pipe.cmd("RPUSH").arg(key).arg(values).ignore();
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn list_swap_head(&self, key: &str, swap: HeadSwap) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let mut invocation = self.swap_head.key(key);
        invocation
            .arg(swap.expected_head)
            .arg(swap.high_water)
            .arg(swap.low_water.max(1));
        for value in swap.replacement {
            invocation.arg(value);
        }
        let applied: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(applied == 1)
    }

    async fn list_truncate(&self, key: &str, keep: usize) -> Result<(), CacheError> {
        if keep == 0 {
            return self.delete(key).await;
        }
        let mut conn = self.conn();
        let _: () = redis::cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(stop_index(keep - 1))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn sorted_len(&self, key: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn();
        let len: usize = redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(len)
    }

    async fn sorted_range_desc(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, i64)>, CacheError> {
        let mut conn = self.conn();
        let members: Vec<(String, i64)> = redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop_index(stop))
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(members)
    }

    async fn sorted_replace(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !members.is_empty() {
            let mut zadd = redis::cmd("ZADD");
            zadd.arg(key);
            for (member, score) in members {
                zadd.arg(score).arg(member);
            }
            pipe.add_command(zadd).ignore();
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn sorted_add_if_exists(
        &self,
        key: &str,
        member: String,
        score: i64,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let added: i64 = self
            .add_if_exists
            .key(key)
            .arg(score)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(added == 1)
    }

    async fn sorted_truncate(&self, key: &str, keep: usize) -> Result<(), CacheError> {
        if keep == 0 {
            return self.delete(key).await;
        }
        let mut conn = self.conn();
        // Ranks are ascending by score; drop everything below the top `keep`.
        let _: () = redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(-(stop_index(keep) + 1))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .delete_if_equals
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(deleted == 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_millisecond_ttl_rounds_up() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2_000);
    }
}
