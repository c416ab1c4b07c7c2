mod content_id;
mod object_store;
mod state;
mod traits;

pub use content_id::{ContentId, EMPTY_TREE_ID};
pub use object_store::{ObjectStore, StoreReader};
pub use state::MirrorState;
pub use traits::{BlobSource, MutableState};
