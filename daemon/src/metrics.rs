use metrics::{counter, histogram};

pub fn record_main_block_fetched() {
    counter!("kestrel_sync_main_block_fetched").increment(1);
}

pub fn record_main_block_proved() {
    counter!("kestrel_sync_main_block_proved").increment(1);
}

pub fn record_block_batch_size(size: u64) {
    histogram!("kestrel_sync_block_batch_size").record(size as f64);
}

pub fn record_error(component: &str) {
    counter!("kestrel_sync_errors", "component" => component.to_string()).increment(1);
}
