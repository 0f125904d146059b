//! Peer set resolution: a static list, or the shared nodes table.

use thiserror::Error;
use url::Url;

use eventdb::EventStore;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer URL {0} has no host")]
    NoHost(Url),

    #[error("reading nodes table: {0}")]
    Database(#[from] eventdb::store::StoreError),
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub url: Url,
}

pub enum PeerSource {
    Static(Vec<Peer>),
    Database { store: EventStore, local_name: String },
}

impl PeerSource {
    /// Build a static peer set from CLI URLs; the peer name is the URL
    /// host. The local node is excluded by name.
    pub fn from_urls(urls: &[Url], local_name: &str) -> Result<Self, PeerError> {
        let mut peers = Vec::with_capacity(urls.len());
        for url in urls {
            let name = url
                .host_str()
                .ok_or_else(|| PeerError::NoHost(url.clone()))?
                .to_string();
            if name == local_name {
                continue;
            }
            peers.push(Peer {
                name,
                url: url.clone(),
            });
        }
        Ok(PeerSource::Static(peers))
    }

    pub fn database(store: EventStore, local_name: String) -> Self {
        PeerSource::Database { store, local_name }
    }

    /// The current peer set. A peer advertised with `backfill_from =
    /// false` is not consulted.
    pub async fn peers(&self) -> Result<Vec<Peer>, PeerError> {
        match self {
            PeerSource::Static(peers) => Ok(peers.clone()),
            PeerSource::Database { store, local_name } => {
                let nodes = store.list_backfill_peers(local_name).await?;
                let mut peers = Vec::with_capacity(nodes.len());
                for node in nodes {
                    match Url::parse(&node.url) {
                        Ok(url) => peers.push(Peer {
                            name: node.name,
                            url,
                        }),
                        Err(e) => {
                            tracing::warn!(node = %node.name, error = %e, "Skipping node with bad URL")
                        }
                    }
                }
                Ok(peers)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_set_excludes_self() {
        let urls = vec![
            Url::parse("http://peer-1:8000").unwrap(),
            Url::parse("http://localhost:8000").unwrap(),
        ];
        let source = PeerSource::from_urls(&urls, "localhost").unwrap();
        let PeerSource::Static(peers) = source else {
            panic!("expected static source");
        };
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "peer-1");
    }
}
