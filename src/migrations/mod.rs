pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_roles;
mod m20250601_000002_create_users;
mod m20250601_000003_create_permissions;
mod m20250601_000004_create_role_permissions;
mod m20250601_000005_create_user_permissions;
mod m20250601_000006_create_model_definitions;
mod m20250601_000007_create_model_versions;
mod m20250601_000008_create_model_role_permissions;
mod m20250601_000009_create_records;
mod m20250601_000010_create_refresh_tokens;
mod m20250601_000011_create_audit_logs;
mod m20250602_000001_seed_defaults;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_roles::Migration),
            Box::new(m20250601_000002_create_users::Migration),
            Box::new(m20250601_000003_create_permissions::Migration),
            Box::new(m20250601_000004_create_role_permissions::Migration),
            Box::new(m20250601_000005_create_user_permissions::Migration),
            Box::new(m20250601_000006_create_model_definitions::Migration),
            Box::new(m20250601_000007_create_model_versions::Migration),
            Box::new(m20250601_000008_create_model_role_permissions::Migration),
            Box::new(m20250601_000009_create_records::Migration),
            Box::new(m20250601_000010_create_refresh_tokens::Migration),
            Box::new(m20250601_000011_create_audit_logs::Migration),
            Box::new(m20250602_000001_seed_defaults::Migration),
        ]
    }
}
