pub mod api_router;
pub mod auth;
pub mod cache;
pub mod calls;
pub mod clients;
pub mod config;
pub mod crm_tasks;
pub mod leads;
pub mod llm;
pub mod pipelines;
pub mod proposals;
pub mod retell;
pub mod settings;
pub mod shared;
pub mod telegram;
pub mod validation;
