use crate::error::{MediaError, Result};
use crate::metadata_store::MetadataStore;
use crate::models::{Actor, Album};
use std::sync::Arc;
use tracing::debug;

/// Operations gated by album access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewAlbum,
    ViewPhoto,
    CreatePhoto,
    UpdatePhoto,
    DeletePhoto,
    UpdateAlbum,
    DeleteAlbum,
    ManageGrants,
    ReindexAlbum,
}

impl Action {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::ViewAlbum | Action::ViewPhoto)
    }
}

/// How an actor relates to an album
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Admin,
    Owner,
    Grantee,
    None,
}

/// Admins and owners may do anything; grantees may only read.
pub fn permits(relation: Relation, action: Action) -> bool {
    match relation {
        Relation::Admin | Relation::Owner => true,
        Relation::Grantee => !action.is_mutation(),
        Relation::None => false,
    }
}

/// Resolves actor/album relations against the metadata store on every call
#[derive(Clone)]
pub struct AuthorizationGuard {
    metadata: Arc<dyn MetadataStore>,
}

impl AuthorizationGuard {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn relation(&self, actor: &Actor, album: &Album) -> Result<Relation> {
        if actor.is_admin() {
            return Ok(Relation::Admin);
        }
        if album.photographer_id == actor.user_id {
            return Ok(Relation::Owner);
        }

        let grants = self.metadata.list_grants_by_album(album.id).await?;
        if grants.iter().any(|g| g.user_id == actor.user_id) {
            Ok(Relation::Grantee)
        } else {
            Ok(Relation::None)
        }
    }

    /// Load the album and check `action` against it
    pub async fn authorize(&self, actor: &Actor, album_id: i64, action: Action) -> Result<Album> {
        let album = self
            .metadata
            .get_album(album_id)
            .await?
            .ok_or_else(|| MediaError::not_found("album", album_id))?;

        let relation = self.relation(actor, &album).await?;
        if !permits(relation, action) {
            debug!(user_id = actor.user_id, album_id, ?action, ?relation, "Access denied");
            return Err(MediaError::Authorization(format!(
                "user {} may not {:?} on album {}",
                actor.user_id, action, album_id
            )));
        }

        Ok(album)
    }
}
