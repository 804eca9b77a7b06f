use blockscout_service_launcher::test_database::TestDbGuard;

mod mock_collaborators;
mod mock_rpc_endpoint;

pub use mock_collaborators::*;
pub use mock_rpc_endpoint::{MockRpcEndpoint, reader_with_mocks, vault_log};

pub async fn init_db(name: &str) -> TestDbGuard {
    TestDbGuard::new::<migration::Migrator>(name).await
}
