pub mod error;
pub mod facade;
pub mod rpc;
pub mod store;
pub mod transport;

pub use error::{Error, Result};
pub use facade::{BlobService, ClientFactory};
pub use rpc::{
    parse_resource_name, BatchGetEntry, BatchPutEntry, ExistsRequest, ExistsResponse, GetRequest,
    PutRequest, PutResponse, Status,
};
pub use store::LocalStore;
pub use transport::LocalDirTransport;
