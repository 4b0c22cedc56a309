//! Content schema fixtures for tests
//!
//! Mirrors the content tables of the site so integration tests can build a
//! staging and a production database with identical (or deliberately drifted)
//! schemas.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::test_utils::schema;
//! use sqlx::SqlitePool;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
//!     schema::init_content_schema(&pool).await.unwrap();
//! }
//! ```

use anyhow::Result;
use sqlx::SqlitePool;

/// Singleton row with global site settings
pub const SITE_SETTINGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS site_settings (
        id INTEGER NOT NULL PRIMARY KEY,
        site_name TEXT NOT NULL,
        logo_url TEXT,
        social_links JSON,
        updated_at TIMESTAMP
    )
"#;

pub const HOME_PAGE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS home_page (
        id INTEGER NOT NULL PRIMARY KEY,
        hero_title TEXT,
        hero_image TEXT,
        sections JSON,
        updated_at TIMESTAMP
    )
"#;

pub const ABOUT_PAGE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS about_page (
        id INTEGER NOT NULL PRIMARY KEY,
        body TEXT,
        gallery JSON,
        updated_at TIMESTAMP
    )
"#;

pub const TEAM_MEMBERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS team_members (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL,
        role TEXT,
        photo_url TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP
    )
"#;

pub const PARTNERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS partners (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL,
        logo_url TEXT,
        website TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0
    )
"#;

pub const NEWS_ARTICLES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS news_articles (
        id INTEGER NOT NULL PRIMARY KEY,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        cover_image TEXT,
        date DATE,
        metadata JSON,
        published INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP
    )
"#;

/// Ordered content blocks owned by a news article
pub const ARTICLE_BLOCKS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS article_blocks (
        id INTEGER NOT NULL PRIMARY KEY,
        article_id INTEGER NOT NULL,
        position INTEGER NOT NULL DEFAULT 0,
        block_type TEXT NOT NULL,
        image_url TEXT,
        content JSON
    )
"#;

/// Lead-capture rows, conceptually keyed by email
pub const DOWNLOAD_LEADS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS download_leads (
        id INTEGER NOT NULL PRIMARY KEY,
        email TEXT NOT NULL,
        name TEXT,
        created_at TIMESTAMP
    )
"#;

/// Every content table in sync order
pub const CONTENT_TABLES: &[(&str, &str)] = &[
    ("site_settings", SITE_SETTINGS_TABLE),
    ("home_page", HOME_PAGE_TABLE),
    ("about_page", ABOUT_PAGE_TABLE),
    ("team_members", TEAM_MEMBERS_TABLE),
    ("partners", PARTNERS_TABLE),
    ("news_articles", NEWS_ARTICLES_TABLE),
    ("article_blocks", ARTICLE_BLOCKS_TABLE),
    ("download_leads", DOWNLOAD_LEADS_TABLE),
];

/// Create every content table
pub async fn init_content_schema(pool: &SqlitePool) -> Result<()> {
    init_content_schema_except(pool, &[]).await
}

/// Create every content table except the named ones
///
/// Used to simulate a destination that lags behind on migrations.
pub async fn init_content_schema_except(pool: &SqlitePool, skip: &[&str]) -> Result<()> {
    for (name, ddl) in CONTENT_TABLES {
        if skip.contains(name) {
            continue;
        }
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
