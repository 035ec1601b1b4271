pub mod db_counts;
pub mod rule_check;
pub mod seed_demo;
