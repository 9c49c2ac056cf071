pub mod keys;
pub mod mem_db;

use athena_store::app::{AthenaStore, Configuration};
use athena_store::codec::TypedValue;
use athena_store::driver::{Application, BlockHeader, Genesis, TxResponse};
use athena_store::store::paths::get_value;
use athena_store::store::CommittedView;
use athena_store::types::BlockHeight;

use mem_db::MemDB;

/// A freshly initialized store: `InitChain` has run against an empty backend.
pub fn initialized_store() -> (AthenaStore<MemDB>, MemDB) {
    let kv = MemDB::new();
    let mut app = AthenaStore::new(
        kv.clone(),
        Configuration::builder().log_events(false).build(),
    )
    .unwrap();
    app.init_chain(Genesis {
        chain_id: "athena-test".to_owned(),
        ..Genesis::default()
    });
    (app, kv)
}

/// Run one block through the full lifecycle, returning the per-transaction responses.
pub fn run_block(
    app: &mut AthenaStore<MemDB>,
    height: i64,
    txs: &[Vec<u8>],
) -> Vec<TxResponse> {
    app.begin_block(BlockHeader {
        height: BlockHeight::new(height),
    });
    let responses = txs.iter().map(|tx| app.deliver_tx(tx)).collect();
    app.end_block(BlockHeight::new(height));
    app.commit();
    responses
}

/// Read one committed value directly, bypassing the query surface.
pub fn committed_value(kv: &MemDB, path: &str) -> Option<TypedValue> {
    get_value(&CommittedView::new(kv.clone()), path).unwrap()
}
