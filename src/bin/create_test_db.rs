use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;
use time::{Date, Duration, OffsetDateTime};

use salesboard_rs::{
    Attribution, Campaign, Product, Sale, SaleItem, initialize_db, upsert_campaign,
    upsert_product, upsert_sale,
};

/// A utility for creating a test database for the salesboard_rs server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,

    /// The number of days of sales to create, ending today.
    #[arg(long, default_value_t = 90)]
    days: i64,
}

const PRODUCTS: [(i64, &str, f64); 4] = [
    (101, "Ceramic Mug", 18.0),
    (102, "Tea Towel", 12.5),
    (103, "Loose Leaf Tea", 9.0),
    (104, "Gift Card", 50.0),
];

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = Connection::open(output_path)?;

    initialize_db(&conn)?;

    let today = OffsetDateTime::now_utc().date();
    let first_day = today - Duration::days(args.days - 1);

    let transaction = conn.unchecked_transaction()?;

    println!("Creating campaigns...");
    let campaigns = demo_campaigns(first_day, today);
    for campaign in &campaigns {
        upsert_campaign(campaign, &transaction)?;
    }

    println!("Creating products...");
    for (id, name, price) in PRODUCTS {
        upsert_product(
            &Product {
                id,
                name: name.to_owned(),
                price: Some(price),
            },
            &transaction,
        )?;
    }

    println!("Creating {} days of sales...", args.days);
    let mut order_id = 1000;
    let mut item_id = 1;

    for day_index in 0..args.days {
        let date = first_day + Duration::days(day_index);

        // Weekly rhythm plus a slow upward trend, no sales on every ninth day.
        let order_count = if day_index % 9 == 4 {
            0
        } else {
            1 + (day_index % 7) % 4 + day_index / 30
        };

        for order_index in 0..order_count {
            let seed = day_index * 31 + order_index * 17;
            let campaign = match seed % 5 {
                0 | 1 => Some(&campaigns[0]),
                2 if date >= campaigns[1].start_date.unwrap_or(first_day) => Some(&campaigns[1]),
                _ => None,
            };

            let (product_id, product_name, unit_price) = PRODUCTS[(seed % 4) as usize];
            let quantity = 1 + seed % 3;
            let mut items = vec![SaleItem {
                id: item_id,
                product_id: Some(product_id),
                product_name: product_name.to_owned(),
                quantity,
                unit_price,
                line_total: unit_price * quantity as f64,
                is_bump: false,
            }];
            item_id += 1;

            if seed % 6 == 0 {
                let (product_id, product_name, unit_price) = PRODUCTS[2];
                items.push(SaleItem {
                    id: item_id,
                    product_id: Some(product_id),
                    product_name: product_name.to_owned(),
                    quantity: 1,
                    unit_price,
                    line_total: unit_price,
                    is_bump: true,
                });
                item_id += 1;
            }

            upsert_sale(&demo_sale(order_id, date, campaign, items), &transaction)?;
            order_id += 1;
        }
    }

    transaction.commit()?;

    println!("Success!");

    Ok(())
}

fn demo_campaigns(first_day: Date, today: Date) -> Vec<Campaign> {
    vec![
        Campaign {
            id: "120210000000001".to_owned(),
            name: "Evergreen Prospecting".to_owned(),
            budget: Some(25.0),
            spend: 1840.35,
            impressions: 182_400,
            clicks: 3_912,
            purchases: 96,
            purchase_value: 3_710.0,
            start_date: Some(first_day),
            end_date: None,
        },
        Campaign {
            id: "120210000000002".to_owned(),
            name: "Spring Launch".to_owned(),
            budget: Some(40.0),
            spend: 612.8,
            impressions: 54_020,
            clicks: 1_208,
            purchases: 31,
            purchase_value: 1_450.5,
            start_date: Some(today - Duration::days(30)),
            end_date: Some(today + Duration::days(14)),
        },
        Campaign {
            id: "120210000000003".to_owned(),
            name: "Holiday Retargeting".to_owned(),
            budget: None,
            spend: 0.0,
            impressions: 0,
            clicks: 0,
            purchases: 0,
            purchase_value: 0.0,
            start_date: Some(today + Duration::days(30)),
            end_date: None,
        },
    ]
}

fn demo_sale(id: i64, date: Date, campaign: Option<&Campaign>, items: Vec<SaleItem>) -> Sale {
    let attribution = match campaign {
        Some(campaign) => Attribution {
            utm_campaign: Some(campaign.id.clone()),
            utm_source: Some("facebook".to_owned()),
            utm_medium: Some("paid".to_owned()),
            traffic_source_type: Some("utm".to_owned()),
            ..Default::default()
        },
        None => Attribution {
            traffic_source_type: Some("organic".to_owned()),
            ..Default::default()
        },
    };

    Sale {
        id,
        date_created: date,
        order_status: "completed".to_owned(),
        order_total: items.iter().map(|item| item.line_total).sum(),
        campaign_id: campaign.map(|campaign| campaign.id.clone()),
        attribution,
        has_bump: items.iter().any(|item| item.is_bump),
        items,
    }
}
