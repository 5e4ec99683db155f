//! Distributed CAS lock over Redis, used to ensure only one scheduler
//! process runs a given job at a time.
//!
//! Acquisition is `SET key value NX PX ttl`; release is a Lua script that
//! only deletes the key if its value still matches the holder's token,
//! so a process can never release a lock another process has since
//! reacquired after this one's TTL expired.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{CoreError, CoreResult};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// A held lock; the process must call [`JobLock::release`] (or let the TTL
/// expire) when the job finishes.
pub struct JobLock {
    key: String,
    token: String,
    ttl_ms: i64,
}

impl JobLock {
    /// Attempt to claim `job_name`'s lock. Returns `None` if another
    /// process already holds it.
    pub async fn try_claim(
        conn: &mut ConnectionManager,
        job_name: &str,
        holder_id: &str,
        ttl_ms: i64,
    ) -> CoreResult<Option<Self>> {
        let key = lock_key(job_name);
        let claimed: bool = redis::cmd("SET")
            .arg(&key)
            .arg(holder_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, Option<String>>(conn)
            .await
            .map_err(CoreError::from)?
            .is_some();

        if claimed {
            Ok(Some(Self {
                key,
                token: holder_id.to_string(),
                ttl_ms,
            }))
        } else {
            Ok(None)
        }
    }

    /// Renew the lock's TTL; called periodically by long-running job
    /// handlers so the lock doesn't expire mid-run.
    pub async fn touch(&self, conn: &mut ConnectionManager) -> CoreResult<bool> {
        let script = redis::Script::new(EXTEND_SCRIPT);
        let extended: i64 = script
            .key(&self.key)
            .arg(&self.token)
            .arg(self.ttl_ms)
            .invoke_async(conn)
            .await
            .map_err(CoreError::from)?;
        Ok(extended == 1)
    }

    pub async fn release(self, conn: &mut ConnectionManager) -> CoreResult<()> {
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _: i64 = script
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(conn)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }
}

fn lock_key(job_name: &str) -> String {
    format!("airank:job-lock:{job_name}")
}

/// Renew a lock's TTL by job name and holder token, without taking
/// ownership of a [`JobLock`] value. Used by [`super::JobContext::touch`],
/// which only has the token, not the original `JobLock`.
pub async fn extend(conn: &mut ConnectionManager, job_name: &str, holder_id: &str, ttl_ms: i64) -> CoreResult<bool> {
    let script = redis::Script::new(EXTEND_SCRIPT);
    let extended: i64 = script
        .key(lock_key(job_name))
        .arg(holder_id)
        .arg(ttl_ms)
        .invoke_async(conn)
        .await
        .map_err(CoreError::from)?;
    Ok(extended == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_namespaced() {
        assert_eq!(lock_key("batch_submitter"), "airank:job-lock:batch_submitter");
    }
}
