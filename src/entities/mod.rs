pub mod order;
pub mod order_item;
pub mod subscription;
pub mod user;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use subscription::Entity as Subscription;
pub use user::Entity as User;
