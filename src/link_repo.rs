use std::{fmt, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveValue::Set,
    ColumnTrait, DbConn, EntityTrait, QueryFilter, QueryOrder,
    sea_query::{Expr, ExprTrait, OnConflict},
};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::{config::db_conn_capsule, orm::link};

/// Owner id stored for links created without signing in.
pub const GUEST_OWNER_ID: &str = "guest";

pub fn link_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(LinkRepositoryImpl { db })
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    Guest,
    User(String),
}

impl Owner {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Guest => GUEST_OWNER_ID,
            Self::User(id) => id,
        }
    }
}

impl From<String> for Owner {
    fn from(id: String) -> Self {
        if id == GUEST_OWNER_ID {
            Self::Guest
        } else {
            Self::User(id)
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub short_code: String,
    pub original_url: String,
    pub views: u64,
    pub owner: Owner,
    pub created_at: OffsetDateTime,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn retrieve_link(&self, short_code: &str) -> anyhow::Result<Option<Link>>;

    /// Writes the [`Link`] under its short code.
    /// An existing link with the same code is overwritten.
    async fn save_link(&self, link: Link) -> anyhow::Result<Link>;

    /// Atomically adds one to the view counter of the link.
    /// Incrementing a code with no link is not an error.
    async fn increment_views(&self, short_code: &str) -> anyhow::Result<()>;

    /// Links belonging to `owner`, newest first.
    async fn links_owned_by(&self, owner: &Owner) -> anyhow::Result<Vec<Link>>;
}

struct LinkRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl LinkRepository for LinkRepositoryImpl {
    #[instrument(skip(self))]
    async fn retrieve_link(&self, short_code: &str) -> anyhow::Result<Option<Link>> {
        link::Entity::find_by_id(short_code)
            .one(&self.db)
            .await
            .context("Failed to query link")?
            .map(Link::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn save_link(&self, link: Link) -> anyhow::Result<Link> {
        let to_insert = link::ActiveModel {
            id: Set(link.short_code.clone()),
            original_url: Set(link.original_url.clone()),
            views: Set(i64::try_from(link.views).context("View count does not fit in BIGINT")?),
            owner_id: Set(link.owner.as_str().to_owned()),
            created_at: Set(link.created_at),
        };

        link::Entity::insert(to_insert)
            .on_conflict(
                OnConflict::column(link::Column::Id)
                    .update_columns([
                        link::Column::OriginalUrl,
                        link::Column::Views,
                        link::Column::OwnerId,
                        link::Column::CreatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("Failed to write link")?;

        Ok(link)
    }

    #[instrument(skip(self))]
    async fn increment_views(&self, short_code: &str) -> anyhow::Result<()> {
        let result = link::Entity::update_many()
            .col_expr(link::Column::Views, Expr::col(link::Column::Views).add(1))
            .filter(link::Column::Id.eq(short_code))
            .exec(&self.db)
            .await
            .context("Failed to increment views")?;

        if result.rows_affected == 0 {
            debug!(short_code, "No link to increment views for");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn links_owned_by(&self, owner: &Owner) -> anyhow::Result<Vec<Link>> {
        link::Entity::find()
            .filter(link::Column::OwnerId.eq(owner.as_str()))
            .order_by_desc(link::Column::CreatedAt)
            .all(&self.db)
            .await
            .context("Failed to query links by owner")?
            .into_iter()
            .map(Link::try_from)
            .collect()
    }
}

impl TryFrom<link::Model> for Link {
    type Error = anyhow::Error;

    fn try_from(
        link::Model {
            id,
            original_url,
            views,
            owner_id,
            created_at,
        }: link::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            views: u64::try_from(views)
                .with_context(|| format!("Link {id} has a negative view count ({views})"))?,
            short_code: id,
            original_url,
            owner: Owner::from(owner_id),
            created_at,
        })
    }
}
