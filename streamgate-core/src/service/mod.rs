pub mod access;
pub mod rate_limit;
pub mod token_store;

pub use access::StreamAccessService;
pub use rate_limit::{Admission, AdmissionLimiter, DistributedAdmissionLimiter, LocalAdmissionLimiter};
pub use token_store::{
    generate_token, InsecureStandaloneTokenStore, MemoryTokenStore, RedisTokenStore, TokenStore,
};
