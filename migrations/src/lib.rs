pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_suppliers_table;
mod m20250101_000002_create_products_table;
mod m20250101_000003_create_orders_table;
mod m20250101_000004_create_order_lines_table;
mod m20250101_000005_create_payments_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_suppliers_table::Migration),
            Box::new(m20250101_000002_create_products_table::Migration),
            Box::new(m20250101_000003_create_orders_table::Migration),
            Box::new(m20250101_000004_create_order_lines_table::Migration),
            Box::new(m20250101_000005_create_payments_table::Migration),
        ]
    }
}
