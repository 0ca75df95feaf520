//! Migration-versioned persistence engine for the CLIAIMONITOR control
//! plane (spec §4.A–§4.I). `Store` owns the single mutex-guarded
//! connection; every other type here borrows it for the duration of a
//! call rather than holding its own handle. See `DESIGN.md` for what in
//! the teacher this is and isn't grounded on.

pub mod agents;
pub mod captain;
pub mod kernel;
pub mod rag;
pub mod recon;
pub mod review;
pub mod router;
pub mod schema;
pub mod tasks;

pub use agents::AgentStore;
pub use captain::CaptainStore;
pub use kernel::{PoolConfig, Store};
pub use rag::RagStore;
pub use recon::ReconStore;
pub use review::{DocumentStore, ReviewStore};
pub use router::{QueryClass, RouteResult, SkillRouter};
pub use tasks::TaskStore;

/// Convenience façade bundling every typed accessor over one `Store`
/// (spec §9: "narrow capability interfaces per owner component" — this
/// exists only so the server/comms crates don't have to construct each
/// accessor by hand at every call site).
pub struct ControlPlane {
    store: Store,
}

impl ControlPlane {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn agents(&self) -> AgentStore<'_> {
        AgentStore::new(&self.store)
    }

    pub fn tasks(&self) -> TaskStore<'_> {
        TaskStore::new(&self.store)
    }

    pub fn review(&self) -> ReviewStore<'_> {
        ReviewStore::new(&self.store)
    }

    pub fn documents(&self) -> DocumentStore<'_> {
        DocumentStore::new(&self.store)
    }

    pub fn rag(&self) -> RagStore<'_> {
        RagStore::new(&self.store)
    }

    pub fn captain(&self) -> CaptainStore<'_> {
        CaptainStore::new(&self.store)
    }

    pub fn recon(&self) -> ReconStore<'_> {
        ReconStore::new(&self.store)
    }

    pub fn router(&self) -> SkillRouter<'_> {
        SkillRouter::new(&self.store)
    }
}
