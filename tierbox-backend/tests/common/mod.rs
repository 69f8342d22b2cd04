pub mod test_tier;
