use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use async_trait::async_trait;
use crate::error::DiscoveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Ptr,
    Srv,
    Txt,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordType::Ptr => "PTR",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
        })
    }
}

/// Unicast DNS lookup against a specific resolver.
///
/// Answers come back in presentation format, one record per line, the way
/// `dig +short` prints them.
#[async_trait]
pub trait DnsQuery: Send + Sync {
    async fn query(
        &self,
        nameserver: IpAddr,
        name: &str,
        record: RecordType,
        timeout: Duration,
    ) -> Result<String, DiscoveryError>;
}

/// `DnsQuery` backed by the `dig` binary.
#[derive(Debug, Clone)]
pub struct DigQuery {
    binary: String,
}

impl DigQuery {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for DigQuery {
    fn default() -> Self {
        Self::new("dig")
    }
}

#[async_trait]
impl DnsQuery for DigQuery {
    async fn query(
        &self,
        nameserver: IpAddr,
        name: &str,
        record: RecordType,
        timeout: Duration,
    ) -> Result<String, DiscoveryError> {
        let failure = |message: String| DiscoveryError::DnsQuery {
            nameserver,
            name: name.to_string(),
            record,
            message,
        };

        // dig only takes whole seconds
        let dig_time = timeout.as_secs().max(1);
        let output = tokio::process::Command::new(&self.binary)
            .arg("+short")
            .arg(format!("+time={}", dig_time))
            .arg("+tries=1")
            .arg(format!("@{}", nameserver))
            .arg(name)
            .arg(record.to_string())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failure(format!("failed to run {}: {}", self.binary, e))),
            Err(_) => return Err(failure(format!("no answer within {:?}", timeout))),
        };

        if !output.status.success() {
            return Err(failure(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let answer = String::from_utf8_lossy(&output.stdout).into_owned();
        // +short prints resolver errors as comment lines
        if answer.lines().any(|line| line.starts_with(";;")) {
            return Err(failure(answer.trim().to_string()));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_display() {
        assert_eq!(RecordType::Ptr.to_string(), "PTR");
        assert_eq!(RecordType::Srv.to_string(), "SRV");
        assert_eq!(RecordType::Txt.to_string(), "TXT");
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_query_failure() {
        let dig = DigQuery::new("/nonexistent/dig-binary");
        let result = dig
            .query("127.0.0.1".parse().unwrap(), "example.", RecordType::Ptr, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DiscoveryError::DnsQuery { record: RecordType::Ptr, .. })));
    }
}
