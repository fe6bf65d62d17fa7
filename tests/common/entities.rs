use uuid::Uuid;

/// Sample User entity for testing
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl User {
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
        }
    }
}

/// Sample Order entity for testing; `SoftDeleteHook` keeps deleted orders.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_name: String,
    pub amount: i64,
}

impl Order {
    pub fn new(user_id: Uuid, product_name: &str, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_name: product_name.to_string(),
            amount,
        }
    }
}
