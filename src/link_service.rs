use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, instrument};
use url::Url;

use crate::{
    link_repo::{Link, LinkRepository, Owner, link_repository_capsule},
    short_code::{CodeGenerator, code_generator_capsule},
};

#[derive(Deserialize)]
pub struct CreateLinkPayload {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ShortenedLink {
    pub short_code: String,
    pub original_url: String,
    pub views: u64,
    pub owner_id: String,
    /// Timestamp in RFC 3339 format
    pub created_at: String,
}

/// What an owner's dashboard shows: their links, newest first, plus totals.
#[derive(Debug, Serialize)]
pub struct OwnerLinks {
    pub links: Vec<ShortenedLink>,
    pub total_views: u64,
    pub active_links: usize,
}

pub fn link_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkService> {
    let link_repo = Arc::clone(get.as_ref(link_repository_capsule));
    let code_generator = Arc::clone(get.as_ref(code_generator_capsule));
    Arc::new(LinkServiceImpl {
        link_repo,
        code_generator,
    })
}

#[async_trait]
pub trait LinkService: Send + Sync {
    async fn create_link(&self, url: &str, owner: Owner)
    -> Result<ShortenedLink, CreateLinkError>;
    async fn links_for_owner(&self, owner: &Owner) -> Result<OwnerLinks, ListLinksError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("URL must start with http:// or https://")]
    MissingHttpScheme,
    #[error("URL is malformed: {0}")]
    Malformed(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum CreateLinkError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("failed to write link: {0}")]
    WriteFailure(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum ListLinksError {
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

/// Checks a user-submitted destination before anything is written.
///
/// # Errors
/// Returns [`UrlValidationError`] when the URL lacks an `http` prefix or cannot be parsed.
pub fn validate_url(raw_url: &str) -> Result<Url, UrlValidationError> {
    if !raw_url.starts_with("http") {
        return Err(UrlValidationError::MissingHttpScheme);
    }
    Ok(Url::parse(raw_url)?)
}

pub(crate) struct LinkServiceImpl {
    pub(crate) link_repo: Arc<dyn LinkRepository>,
    pub(crate) code_generator: Arc<dyn CodeGenerator>,
}

#[async_trait]
impl LinkService for LinkServiceImpl {
    #[instrument(skip(self))]
    async fn create_link(
        &self,
        url: &str,
        owner: Owner,
    ) -> Result<ShortenedLink, CreateLinkError> {
        validate_url(url)?;

        // NOTE: codes are not checked for collisions; a clash overwrites the older link
        let short_code = self.code_generator.generate();
        let to_save = Link {
            short_code,
            // NOTE: stored exactly as submitted so resolving hands back the same string
            original_url: url.to_owned(),
            views: 0,
            owner,
            created_at: OffsetDateTime::now_utc(),
        };

        let saved = self
            .link_repo
            .save_link(to_save)
            .await
            .map_err(CreateLinkError::WriteFailure)?;
        info!(short_code = %saved.short_code, owner = %saved.owner, "Created link");

        saved
            .try_into()
            .context("Failed to convert new Link into external format")
            .map_err(CreateLinkError::WriteFailure)
    }

    #[instrument(skip(self))]
    async fn links_for_owner(&self, owner: &Owner) -> Result<OwnerLinks, ListLinksError> {
        let links = self
            .link_repo
            .links_owned_by(owner)
            .await
            .map_err(ListLinksError::Internal)?;

        let total_views = links.iter().map(|link| link.views).sum();
        let active_links = links.len();
        let links = links
            .into_iter()
            .map(ShortenedLink::try_from)
            .collect::<anyhow::Result<Vec<_>>>()
            .context("Failed to convert owner links into external format")
            .map_err(ListLinksError::Internal)?;

        Ok(OwnerLinks {
            links,
            total_views,
            active_links,
        })
    }
}

impl TryFrom<Link> for ShortenedLink {
    type Error = anyhow::Error;

    fn try_from(
        Link {
            short_code,
            original_url,
            views,
            owner,
            created_at,
        }: Link,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            short_code,
            original_url,
            views,
            owner_id: owner.as_str().to_owned(),
            created_at: created_at
                .format(&Rfc3339)
                .context("Failed to format creation timestamp")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockall::{Sequence, predicate::*};
    use time::macros::datetime;

    use crate::{
        link_repo::MockLinkRepository,
        short_code::{MockCodeGenerator, RandomCodeGenerator, SHORT_CODE_LEN},
    };

    use super::*;

    fn fixed_generator(code: &'static str) -> MockCodeGenerator {
        let mut generator = MockCodeGenerator::new();
        generator.expect_generate().returning(move || code.to_owned());
        generator
    }

    fn stored_link(short_code: &str, views: u64) -> Link {
        Link {
            short_code: short_code.to_owned(),
            original_url: format!("https://example.com/{short_code}"),
            views,
            owner: Owner::User("uid-1".to_owned()),
            created_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("https://example.com/a?b=c").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_missing_scheme() {
        assert_eq!(
            validate_url("example.com"),
            Err(UrlValidationError::MissingHttpScheme)
        );
        assert_eq!(
            validate_url("ftp://example.com"),
            Err(UrlValidationError::MissingHttpScheme)
        );
    }

    #[test]
    fn test_validate_url_rejects_malformed() {
        assert!(matches!(
            validate_url("http://"),
            Err(UrlValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_url_rejects_bare_host_with_http_prefix() {
        // NOTE: passes the prefix check but has no scheme
        assert!(matches!(
            validate_url("httpbin.org"),
            Err(UrlValidationError::Malformed(url::ParseError::RelativeUrlWithoutBase))
        ));
    }

    #[tokio::test]
    async fn test_create_link_as_guest() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_save_link()
            .withf(|link| {
                link.short_code == "k3x9qa"
                    && link.original_url == "https://example.com"
                    && link.views == 0
                    && link.owner == Owner::Guest
            })
            .once()
            .return_once(Ok);

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(fixed_generator("k3x9qa")),
        };
        let created = service
            .create_link("https://example.com", Owner::Guest)
            .await
            .unwrap();

        assert_eq!(created.short_code, "k3x9qa");
        assert_eq!(created.original_url, "https://example.com");
        assert_eq!(created.views, 0);
        assert_eq!(created.owner_id, "guest");
    }

    #[tokio::test]
    async fn test_create_link_with_random_code() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo.expect_save_link().once().return_once(Ok);

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(RandomCodeGenerator),
        };
        let created = service
            .create_link("https://example.com", Owner::User("uid-1".to_owned()))
            .await
            .unwrap();

        assert_eq!(created.short_code.len(), SHORT_CODE_LEN);
        assert!(created.short_code.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_eq!(created.owner_id, "uid-1");
    }

    #[tokio::test]
    async fn test_create_link_rejects_url_before_writing() {
        // NOTE: no expectations set, so any repository call fails the test
        let mock_repo = MockLinkRepository::new();
        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(MockCodeGenerator::new()),
        };

        let result = service
            .create_link("www.example.com", Owner::Guest)
            .await
            .unwrap_err();
        assert!(matches!(
            result,
            CreateLinkError::InvalidUrl(UrlValidationError::MissingHttpScheme)
        ));
    }

    #[tokio::test]
    async fn test_create_link_write_failure() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_save_link()
            .once()
            .return_once(|_| Err(anyhow::anyhow!("permission denied")));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(fixed_generator("k3x9qa")),
        };
        let result = service
            .create_link("https://example.com", Owner::Guest)
            .await
            .unwrap_err();
        assert!(matches!(result, CreateLinkError::WriteFailure(_)));
    }

    #[tokio::test]
    async fn test_create_link_colliding_codes_both_written() {
        let mut seq = Sequence::new();
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_save_link()
            .withf(|link| link.short_code == "same00" && link.original_url == "https://first.example")
            .once()
            .in_sequence(&mut seq)
            .return_once(Ok);
        mock_repo
            .expect_save_link()
            .withf(|link| link.short_code == "same00" && link.original_url == "https://second.example")
            .once()
            .in_sequence(&mut seq)
            .return_once(Ok);

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(fixed_generator("same00")),
        };
        let first = service
            .create_link("https://first.example", Owner::Guest)
            .await
            .unwrap();
        let second = service
            .create_link("https://second.example", Owner::Guest)
            .await
            .unwrap();
        assert_eq!(first.short_code, second.short_code);
    }

    #[tokio::test]
    async fn test_links_for_owner_totals() {
        let owner = Owner::User("uid-1".to_owned());
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_links_owned_by()
            .with(eq(owner.clone()))
            .once()
            .return_once(|_| Ok(vec![stored_link("new111", 5), stored_link("old222", 12)]));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(MockCodeGenerator::new()),
        };
        let owner_links = service.links_for_owner(&owner).await.unwrap();

        assert_eq!(owner_links.total_views, 17);
        assert_eq!(owner_links.active_links, 2);
        assert_eq!(owner_links.links[0].short_code, "new111");
        assert_eq!(owner_links.links[0].created_at, "2025-06-01T12:00:00Z");
    }

    #[tokio::test]
    async fn test_links_for_owner_empty() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_links_owned_by()
            .once()
            .return_once(|_| Ok(Vec::new()));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(MockCodeGenerator::new()),
        };
        let owner_links = service
            .links_for_owner(&Owner::User("uid-2".to_owned()))
            .await
            .unwrap();

        assert!(owner_links.links.is_empty());
        assert_eq!(owner_links.total_views, 0);
        assert_eq!(owner_links.active_links, 0);
    }

    #[tokio::test]
    async fn test_links_for_owner_db_error() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_links_owned_by()
            .once()
            .return_once(|_| Err(anyhow::anyhow!("test failure")));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
            code_generator: Arc::new(MockCodeGenerator::new()),
        };
        let result = service.links_for_owner(&Owner::Guest).await.unwrap_err();
        assert!(matches!(result, ListLinksError::Internal(_)));
    }
}
