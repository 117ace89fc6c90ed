//! Core service layer: document-store-backed services for every
//! component of §3/§4, plus the `Core` container that wires them
//! together at startup.

pub mod services;

use spacenote_common::{AppResult, BlobStore, Config};
use spacenote_db::DocumentStore;

use services::{
    AccessService, AttachmentService, CommentService, CounterService, ExportService, IdentityService,
    MessengerService, NoteService, SpaceService,
};

/// Every service the facade needs, constructed once at startup in
/// dependency order and shared behind cheap clones (`DocumentStore` and
/// each service hold only a `mongodb::Database` handle and, where
/// needed, an `Arc`-backed cache).
#[derive(Clone)]
pub struct Core {
    pub store: DocumentStore,
    pub blobs: BlobStore,
    pub identity: IdentityService,
    pub access: AccessService,
    pub counters: CounterService,
    pub spaces: SpaceService,
    pub notes: NoteService,
    pub comments: CommentService,
    pub attachments: AttachmentService,
    pub messenger: MessengerService,
    pub export: ExportService,
}

impl Core {
    /// Connect to the document store and construct every service.
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let store = DocumentStore::connect(&config.database_url).await?;
        spacenote_db::ensure_indexes(&store).await?;
        let blobs = BlobStore::new(&config.attachments_path, &config.images_path);
        Ok(Self::new(store, blobs))
    }

    /// Build the service graph over an already-connected store (used by
    /// the server binary after a shared `connect`, and by tests against
    /// an in-process store).
    #[must_use]
    pub fn new(store: DocumentStore, blobs: BlobStore) -> Self {
        let identity = IdentityService::new(store.clone());
        let access = AccessService::new(store.clone(), identity.clone());
        let counters = CounterService::new(store.clone());
        let spaces = SpaceService::new(store.clone());
        let notes = NoteService::new(store.clone());
        let comments = CommentService::new(store.clone());
        let attachments = AttachmentService::new(store.clone(), blobs.clone(), counters.clone());
        let messenger = MessengerService::new(store.clone(), counters.clone());
        let export = ExportService::new(
            store.clone(),
            spaces.clone(),
            notes.clone(),
            comments.clone(),
            attachments.clone(),
            counters.clone(),
            identity.clone(),
        );

        Self { store, blobs, identity, access, counters, spaces, notes, comments, attachments, messenger, export }
    }

    /// Load the space cache and run anything else services need before
    /// serving traffic.
    pub async fn start(&self) -> AppResult<()> {
        self.spaces.load_cache().await
    }
}
