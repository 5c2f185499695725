diesel::table! {
    connections (id) {
        id -> Text,
        user_id -> Text,
        client_key -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    credentials (id) {
        id -> Text,
        connection_id -> Text,
        access_token -> Text,
        refresh_token -> Text,
        access_token_expires_at -> Timestamp,
        refresh_token_expires_at -> Timestamp,
        code_verifier -> Nullable<Text>,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    accounts (id) {
        id -> Text,
        connection_id -> Text,
        account_key -> Text,
        account_id -> Text,
        display_name -> Text,
        currency -> Text,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    snapshots (id) {
        id -> Text,
        user_id -> Text,
        snapshot_at -> Timestamp,
        total_value -> Double,
        cash_balance -> Double,
        unrealized_pnl -> Double,
        currency -> Text,
        asset_breakdown -> Text,
        currency_exposure -> Text,
    }
}

diesel::table! {
    holdings (id) {
        id -> Text,
        snapshot_id -> Text,
        symbol -> Text,
        name -> Text,
        asset_type -> Text,
        asset_class -> Text,
        quantity -> Double,
        current_price -> Double,
        market_value -> Double,
        currency -> Text,
        weight -> Double,
        unrealized_pnl -> Double,
        uic -> BigInt,
        saxo_asset_type -> Text,
    }
}

diesel::joinable!(credentials -> connections (connection_id));
diesel::joinable!(accounts -> connections (connection_id));
diesel::joinable!(holdings -> snapshots (snapshot_id));

diesel::allow_tables_to_appear_in_same_query!(connections, credentials, accounts, snapshots, holdings);
