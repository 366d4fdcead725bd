pub mod mock_heap;
