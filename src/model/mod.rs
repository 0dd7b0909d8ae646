//! Pure data types: handles, records and the transport seams they wrap.

pub mod handle;
pub mod record;
pub mod transport;

pub use handle::{HandleAllocator, ResourceHandle, ResourceKind};
pub use record::{RecordState, ResourceRecord, WriteQueue};
pub use transport::{DatagramSocket, ListenerSocket, StreamSocket, Transport};

pub(crate) use record::FlushStatus;
