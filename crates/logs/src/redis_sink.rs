//! Redis Stream sink for realtime log tailing.

use crate::{Error, LogSink, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::io::Write;
use tracing::{debug, warn};

/// How long a finished stream stays readable for late consumers.
const STREAM_TTL_SECS: i64 = 300;

/// Publishes each complete log line as one stream entry keyed by the job id,
/// with a monotonically increasing line number. Redis failures never fail a
/// write; the line is only lost from the realtime view.
pub struct RedisSink {
    conn: MultiplexedConnection,
    job_id: String,
    step_id: String,
    line_number: u64,
    pending: String,
}

impl RedisSink {
    /// Connect and make sure the stream's consumer groups exist.
    pub async fn connect(
        addr: &str,
        password: &str,
        job_id: String,
        step_id: String,
    ) -> Result<Self> {
        let url = if password.is_empty() {
            format!("redis://{addr}")
        } else {
            format!("redis://:{password}@{addr}")
        };
        let client = redis::Client::open(url).map_err(|source| Error::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|source| Error::Connect {
                addr: addr.to_string(),
                source,
            })?;

        // Both consumer groups tail the same stream; creating an existing
        // group returns BUSYGROUP, which is fine.
        for group in ["CLI", "UI"] {
            let created: redis::RedisResult<String> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&job_id)
                .arg(group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            if let Err(e) = created {
                if !e.to_string().contains("BUSYGROUP") {
                    warn!(%job_id, group, "failed to create consumer group: {e}");
                }
            }
        }

        Ok(Self {
            conn,
            job_id,
            step_id,
            line_number: 0,
            pending: String::new(),
        })
    }

    async fn publish_line(&mut self, line: &str) {
        self.line_number += 1;
        let line_number = self.line_number.to_string();
        let fields: [(&str, &str); 4] = [
            ("jobId", &self.job_id),
            ("stepId", &self.step_id),
            ("lineNumber", &line_number),
            ("output", line),
        ];
        let result: redis::RedisResult<String> =
            self.conn.xadd(&self.job_id, "*", &fields).await;
        match result {
            Ok(_) if self.line_number == 1 => {
                debug!(job_id = %self.job_id, "first log line sent to Redis stream");
            }
            Ok(_) => {}
            Err(e) => warn!(job_id = %self.job_id, "failed to send log line to Redis: {e}"),
        }
    }
}

#[async_trait]
impl LogSink for RedisSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        // Mirror to stdout for pod log collection.
        {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk);
            let _ = stdout.flush();
        }

        self.pending.push_str(&String::from_utf8_lossy(chunk));
        while let Some(idx) = self.pending.find('\n') {
            let rest = self.pending.split_off(idx + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.truncate(line.len() - 1);
            self.publish_line(&line).await;
        }

        Ok(chunk.len())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.publish_line(&line).await;
        }

        // Sentinel entry so consumers know the stream is complete.
        let fields: [(&str, &str); 3] = [
            ("jobId", &self.job_id),
            ("stepId", &self.step_id),
            ("done", "true"),
        ];
        let sentinel: redis::RedisResult<String> =
            self.conn.xadd(&self.job_id, "*", &fields).await;
        if let Err(e) = sentinel {
            warn!(job_id = %self.job_id, "failed to send stream sentinel: {e}");
        }

        // Expire rather than delete so the UI can read remaining lines.
        let expired: redis::RedisResult<bool> =
            self.conn.expire(&self.job_id, STREAM_TTL_SECS).await;
        if let Err(e) = expired {
            warn!(job_id = %self.job_id, "failed to set stream TTL: {e}");
        }

        Ok(())
    }
}
