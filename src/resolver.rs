use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, instrument, warn};

use crate::link_repo::{LinkRepository, link_repository_capsule};

/// Result of resolving a short code.
///
/// A missing link and a failed lookup both come back as [`Outcome::NotFound`];
/// the difference only shows up in the logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Resolved { destination: String },
    NotFound,
}

/// Response body for a resolved short code.
/// The client waits `countdown_seconds` before navigating to `destination`.
#[derive(Debug, Serialize)]
pub struct RedirectPage {
    pub destination: String,
    pub countdown_seconds: u32,
}

pub fn resolver_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn Resolver> {
    let link_repo = Arc::clone(get.as_ref(link_repository_capsule));
    Arc::new(ResolverImpl { link_repo })
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Looks up `short_code` and, when found, records one view in the background.
    /// The returned [`Outcome`] never waits on the view being recorded.
    async fn resolve(&self, short_code: &str) -> Outcome;
}

struct ResolverImpl {
    link_repo: Arc<dyn LinkRepository>,
}

impl ResolverImpl {
    /// Like [`Resolver::resolve`], but also hands back the view-recording task
    /// so it can be awaited.
    async fn resolve_tracked(&self, short_code: &str) -> (Outcome, Option<JoinHandle<()>>) {
        match self.link_repo.retrieve_link(short_code).await {
            Ok(Some(link)) => {
                let view_task = spawn_view_increment(Arc::clone(&self.link_repo), link.short_code);
                (
                    Outcome::Resolved {
                        destination: link.original_url,
                    },
                    Some(view_task),
                )
            }
            Ok(None) => {
                debug!(short_code, "No link for short code");
                (Outcome::NotFound, None)
            }
            Err(err) => {
                error!(short_code, ?err, "Link lookup failed; reporting not found");
                (Outcome::NotFound, None)
            }
        }
    }
}

#[async_trait]
impl Resolver for ResolverImpl {
    #[instrument(skip(self))]
    async fn resolve(&self, short_code: &str) -> Outcome {
        let (outcome, _view_task) = self.resolve_tracked(short_code).await;
        outcome
    }
}

/// Attempts the increment exactly once; failures are logged and dropped.
fn spawn_view_increment(link_repo: Arc<dyn LinkRepository>, short_code: String) -> JoinHandle<()> {
    let span = info_span!("record_view", short_code = %short_code);
    tokio::spawn(
        async move {
            if let Err(err) = link_repo.increment_views(&short_code).await {
                warn!(?err, "Failed to record view");
            }
        }
        .instrument(span),
    )
}
