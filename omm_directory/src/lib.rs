pub mod aggregator;
pub mod directory;
pub mod events;
pub mod registry;
pub mod service_list;

pub use aggregator::AggregatedService;
pub use aggregator::DirectoryAggregator;
pub use directory::ServiceDirectory;
pub use directory::SourceEntry;
pub use events::DirectoryEvent;
pub use registry::FIRST_GENERATED_SERVICE_ID;
pub use registry::ServiceIdRegistry;
pub use service_list::ServiceList;
pub use service_list::ServiceLists;
