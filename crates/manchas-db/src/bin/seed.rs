//! # Seed Data Generator
//!
//! Populates the database with suppliers and pet-supply products for
//! development.
//!
//! ## Usage
//! ```bash
//! # Generate 200 products (default)
//! cargo run -p manchas-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p manchas-db --bin seed -- --count 500
//!
//! # Specify database path
//! cargo run -p manchas-db --bin seed -- --db ./data/manchas.db
//! ```
//!
//! Prices are whole pesos; sell price sits 35-55% above cost.

use chrono::Utc;
use std::env;

use manchas_core::{Money, Product, ProductCategory, ProductState};
use manchas_db::repository::product::generate_product_id;
use manchas_db::{Database, DbConfig};

const CATALOG: &[(ProductCategory, &[&str])] = &[
    (
        ProductCategory::Snacks,
        &[
            "Galletas de Pollo",
            "Hueso Carnaza",
            "Tiras de Res",
            "Premios Dentales",
            "Snack de Salmon",
            "Orejas Deshidratadas",
        ],
    ),
    (
        ProductCategory::Hygiene,
        &[
            "Shampoo Avena",
            "Toallas Humedas",
            "Arena Aglomerante",
            "Cepillo Dental",
            "Perfume Canino",
            "Bolsas Biodegradables",
        ],
    ),
    (
        ProductCategory::Toys,
        &[
            "Pelota Saltarina",
            "Cuerda Mordedora",
            "Raton de Peluche",
            "Kong Clasico",
            "Varita con Plumas",
            "Frisbee Flexible",
        ],
    ),
    (
        ProductCategory::Accessories,
        &[
            "Collar Reflectivo",
            "Pechera Acolchada",
            "Correa Retractil",
            "Placa Identificacion",
            "Cama Ortopedica",
            "Transportadora",
        ],
    ),
    (
        ProductCategory::Feeders,
        &[
            "Comedero Acero",
            "Bebedero Fuente",
            "Comedero Antivoracidad",
            "Dispensador Automatico",
            "Plato Doble",
            "Tapete Comedero",
        ],
    ),
];

/// Size variants and the price added for each, in pesos.
const SIZES: &[(&str, i64)] = &[
    ("XS", 0),
    ("S", 2_000),
    ("M", 4_500),
    ("L", 7_000),
    ("XL", 9_500),
    ("Mini", 0),
    ("Familiar", 12_000),
];

const SUPPLIERS: &[(&str, &str, &str)] = &[
    ("Distribuidora Canina SAS", "NIT", "900123456"),
    ("Mundo Mascotas Mayorista", "NIT", "901987654"),
    ("Importadora Felina", "NIT", "800555123"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./manchas_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Manchas y Pecas Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./manchas_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Manchas y Pecas Seed Data Generator");
    println!("===================================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database, migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    for (name, doc_type, doc_number) in SUPPLIERS {
        db.suppliers()
            .create(name, doc_type, doc_number, None, None)
            .await?;
    }
    println!("✓ Created {} suppliers", SUPPLIERS.len());

    let mut generated = 0;
    let start = std::time::Instant::now();

    'outer: for (category, names) in CATALOG {
        for (name_idx, name) in names.iter().enumerate() {
            for (size_idx, (size, addon)) in SIZES.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }

                let product = generate_product(*category, name, size, *addon, name_idx * 10 + size_idx);
                if let Err(e) = db.products().insert(&product).await {
                    eprintln!("Failed to insert {}: {}", product.name, e);
                    continue;
                }

                generated += 1;
            }
        }
    }

    println!();
    println!("✓ Generated {} products in {:?}", generated, start.elapsed());
    println!("✓ Seed complete!");

    Ok(())
}

fn generate_product(
    category: ProductCategory,
    name: &str,
    size: &str,
    price_addon: i64,
    seed: usize,
) -> Product {
    let now = Utc::now();

    // Cost: 4.000 - 23.900 pesos in steps of 100
    let cost = 4_000 + ((seed as i64 * 1_300) % 20_000) / 100 * 100 + price_addon;
    let markup_pct = 35 + (seed as i64 % 21);
    let sell = cost + cost * markup_pct / 100;

    Product {
        id: generate_product_id(),
        name: format!("{} {}", name, size),
        category,
        description: None,
        cost_price: Money::from_major(cost),
        sell_price: Money::from_major(sell),
        stock: (seed % 41) as i64,
        state: ProductState::Active,
        created_at: now,
        updated_at: now,
    }
}
