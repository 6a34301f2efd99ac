use serde::{Deserialize, Serialize};

use super::flexible_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(alias = "_id", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(alias = "title")]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: Option<u32>,
}

impl Product {
    pub fn price_display(&self) -> String {
        format!("${:.2}", self.price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(alias = "_id", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub instructor: Option<String>,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    #[serde(alias = "_id", deserialize_with = "flexible_id")]
    pub id: String,
    pub title: String,
    #[serde(default, alias = "summary")]
    pub excerpt: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_aliases_and_price() {
        let product: Product =
            serde_json::from_str(r#"{"_id": 5, "title": "Poster", "price": 12.5}"#).unwrap();
        assert_eq!(product.id, "5");
        assert_eq!(product.name, "Poster");
        assert_eq!(product.price_display(), "$12.50");
        assert_eq!(product.stock, None);
    }

    #[test]
    fn test_course_name_alias() {
        let course: Course = serde_json::from_str(r#"{"id": "c1", "name": "Rust 101"}"#).unwrap();
        assert_eq!(course.title, "Rust 101");
        assert_eq!(course.price, 0.0);
    }
}
