use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as ProductEntity},
        supplier::{self, Entity as SupplierEntity},
    },
    errors::ServiceError,
    services::money::{self, validate_money},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateSupplierRequest {
    #[validate(length(min = 1, max = 50, message = "number must be 1-50 characters"))]
    pub number: String,
    #[validate(length(min = 1, max = 255, message = "name must be 1-255 characters"))]
    pub name: String,
    pub address: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SupplierResponse {
    pub id: i32,
    pub number: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

impl From<supplier::Model> for SupplierResponse {
    fn from(model: supplier::Model) -> Self {
        Self {
            id: model.id,
            number: model.number,
            name: model.name,
            address: model.address,
            phone: model.phone,
            email: model.email,
            is_archived: model.is_archived,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "name must be 1-255 characters"))]
    pub name: String,
    #[validate(range(min = 1, message = "sub_category_id must be a positive integer"))]
    pub sub_category_id: i32,
    #[validate(custom = "validate_money")]
    #[schema(value_type = String, example = "12.50")]
    pub price: Decimal,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    #[serde(default)]
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: i32,
    pub name: String,
    pub sub_category_id: i32,
    #[schema(value_type = String, example = "12.50")]
    pub price: Decimal,
    pub stock: i32,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            sub_category_id: model.sub_category_id,
            price: money::round_money(model.price),
            stock: model.stock,
            is_archived: model.is_archived,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Registers and archives the suppliers and products orders refer to.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(number = %request.number))]
    pub async fn create_supplier(
        &self,
        request: CreateSupplierRequest,
    ) -> Result<SupplierResponse, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;

        let taken = SupplierEntity::find()
            .filter(
                Condition::any()
                    .add(supplier::Column::Number.eq(request.number.as_str()))
                    .add(supplier::Column::Name.eq(request.name.as_str())),
            )
            .count(db)
            .await?;
        if taken > 0 {
            warn!("Supplier number or name already registered");
            return Err(ServiceError::Conflict(format!(
                "A supplier with number {} or name {} already exists",
                request.number, request.name
            )));
        }

        let saved = supplier::ActiveModel {
            number: Set(request.number),
            name: Set(request.name),
            address: Set(request.address),
            phone: Set(request.phone),
            email: Set(request.email),
            is_archived: Set(false),
            ..Default::default()
        }
        .insert(db)
        .await?;

        counter!("hardware_store.suppliers.created", 1);
        info!(supplier_id = saved.id, "Supplier created");
        Ok(saved.into())
    }

    #[instrument(skip(self))]
    pub async fn get_supplier(&self, supplier_id: i32) -> Result<SupplierResponse, ServiceError> {
        SupplierEntity::find_by_id(supplier_id)
            .one(&*self.db_pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("Supplier {} not found", supplier_id)))
    }

    /// Excludes the supplier from new orders. Archiving twice is a no-op.
    #[instrument(skip(self))]
    pub async fn archive_supplier(
        &self,
        supplier_id: i32,
    ) -> Result<SupplierResponse, ServiceError> {
        let db = &*self.db_pool;
        let existing = SupplierEntity::find_by_id(supplier_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Supplier {} not found", supplier_id)))?;

        if existing.is_archived {
            return Ok(existing.into());
        }

        let mut active: supplier::ActiveModel = existing.into();
        active.is_archived = Set(true);
        let updated = active.update(db).await?;

        info!(supplier_id, "Supplier archived");
        Ok(updated.into())
    }

    #[instrument(skip(self, request), fields(name = %request.name, sub_category_id = request.sub_category_id))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductResponse, ServiceError> {
        request.validate()?;
        let price = money::ensure_positive_amount("price", request.price)?;
        let db = &*self.db_pool;

        let duplicates = ProductEntity::find()
            .filter(product::Column::SubCategoryId.eq(request.sub_category_id))
            .filter(product::Column::Name.eq(request.name.as_str()))
            .filter(product::Column::IsArchived.eq(false))
            .count(db)
            .await?;
        if duplicates > 0 {
            return Err(ServiceError::Conflict(format!(
                "An active product named {} already exists in sub-category {}",
                request.name, request.sub_category_id
            )));
        }

        let saved = product::ActiveModel {
            name: Set(request.name),
            sub_category_id: Set(request.sub_category_id),
            price: Set(price),
            stock: Set(request.stock),
            is_archived: Set(false),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await?;

        counter!("hardware_store.products.created", 1);
        info!(product_id = saved.id, "Product created");
        Ok(saved.into())
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: i32) -> Result<ProductResponse, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Excludes the product from new orders and deliveries. Archiving twice is a no-op.
    #[instrument(skip(self))]
    pub async fn archive_product(&self, product_id: i32) -> Result<ProductResponse, ServiceError> {
        let db = &*self.db_pool;
        let existing = ProductEntity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if existing.is_archived {
            return Ok(existing.into());
        }

        let mut active: product::ActiveModel = existing.into();
        active.is_archived = Set(true);
        let updated = active.update(db).await?;

        info!(product_id, "Product archived");
        Ok(updated.into())
    }
}
