pub mod blob;

pub use blob::{BlobStore, FilesystemBlobStore, ObjectStoreBlobStore, StoredBlob};
