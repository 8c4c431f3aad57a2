table! {
    cart_items (id) {
        id -> Int4,
        user_id -> Int4,
        product_id -> Int4,
        created_at -> Timestamp,
    }
}

table! {
    order_items (id) {
        id -> Int4,
        order_id -> Int4,
        product_id -> Int4,
    }
}

table! {
    orders (id) {
        id -> Int4,
        user_id -> Int4,
        created_at -> Timestamp,
    }
}

table! {
    product_tags (product_id, tag_id) {
        product_id -> Int4,
        tag_id -> Int4,
    }
}

table! {
    products (id) {
        id -> Int4,
        title -> Varchar,
        description -> Text,
        price_cents -> Int8,
        file_path -> Varchar,
        image_path -> Nullable<Varchar>,
        user_id -> Int4,
        created_at -> Timestamp,
    }
}

table! {
    tags (id) {
        id -> Int4,
        name -> Varchar,
    }
}

table! {
    users (id) {
        id -> Int4,
        username -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        balance_cents -> Int8,
        created_at -> Timestamp,
    }
}

joinable!(cart_items -> products (product_id));
joinable!(cart_items -> users (user_id));
joinable!(order_items -> orders (order_id));
joinable!(order_items -> products (product_id));
joinable!(orders -> users (user_id));
joinable!(product_tags -> products (product_id));
joinable!(product_tags -> tags (tag_id));
joinable!(products -> users (user_id));

allow_tables_to_appear_in_same_query!(
    cart_items,
    order_items,
    orders,
    product_tags,
    products,
    tags,
    users,
);
