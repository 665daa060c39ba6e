//! Per-request replica parameters: the `replicas=ack/from` pair.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BadParameters {
    #[error("replicas must look like <ack>/<from>: {0:?}")]
    Malformed(String),
    #[error("replica counts out of range: ack={ack}, from={from}, cluster={cluster}")]
    OutOfRange {
        ack: usize,
        from: usize,
        cluster: usize,
    },
}

/// How many acknowledgements a request needs (`ack`) out of how many
/// replicas it contacts (`from`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaParams {
    pub ack: usize,
    pub from: usize,
}

impl ReplicaParams {
    /// Parse an optional `ack/from` string, falling back to the given
    /// defaults, and enforce `1 <= ack <= from <= cluster_size`.
    pub fn parse(
        replicas: Option<&str>,
        default_ack: usize,
        default_from: usize,
        cluster_size: usize,
    ) -> Result<Self, BadParameters> {
        let (ack, from) = match replicas {
            None => (default_ack, default_from),
            Some(raw) => {
                let (ack, from) = raw
                    .split_once('/')
                    .ok_or_else(|| BadParameters::Malformed(raw.to_string()))?;
                let ack = ack
                    .parse::<usize>()
                    .map_err(|_| BadParameters::Malformed(raw.to_string()))?;
                let from = from
                    .parse::<usize>()
                    .map_err(|_| BadParameters::Malformed(raw.to_string()))?;
                (ack, from)
            }
        };

        if ack < 1 || from < 1 || ack > from || from > cluster_size {
            return Err(BadParameters::OutOfRange {
                ack,
                from,
                cluster: cluster_size,
            });
        }
        Ok(Self { ack, from })
    }
}
